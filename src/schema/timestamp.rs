// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Timestamp extraction.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value as Json;
use std::fmt;

use crate::error::{ConfigurationError, ExtractionError};
use crate::json::{scalar_to_string, JsonRecord};
use crate::properties::Properties;

pub const KEY_PARAM: &str = "key";
pub const KEY_DEFAULT: &str = "timestamp";
pub const FORMAT_PARAM: &str = "format";

/// How the timestamp element is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampFormat {
    /// Numbers are epoch milliseconds, strings are RFC 3339.
    Auto,
    EpochMillis,
    EpochSeconds,
    Rfc3339,
    /// chrono `strftime` pattern. Patterns without a zone are read as UTC.
    Pattern(String),
}

impl TimestampFormat {
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim() {
            "auto" => Ok(Self::Auto),
            "epoch-ms" => Ok(Self::EpochMillis),
            "epoch-s" => Ok(Self::EpochSeconds),
            "rfc3339" => Ok(Self::Rfc3339),
            pattern => {
                if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
                    Err("not a valid date-time pattern".to_string())
                } else {
                    Ok(Self::Pattern(pattern.to_string()))
                }
            }
        }
    }
}

impl fmt::Display for TimestampFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::EpochMillis => f.write_str("epoch-ms"),
            Self::EpochSeconds => f.write_str("epoch-s"),
            Self::Rfc3339 => f.write_str("rfc3339"),
            Self::Pattern(pattern) => f.write_str(pattern),
        }
    }
}

/// Where and how a schema reads the record timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampDescriptor {
    key: String,
    format: TimestampFormat,
}

impl Default for TimestampDescriptor {
    fn default() -> Self {
        Self {
            key: KEY_DEFAULT.to_string(),
            format: TimestampFormat::Auto,
        }
    }
}

impl TimestampDescriptor {
    pub fn new(key: impl Into<String>, format: TimestampFormat) -> Self {
        Self {
            key: key.into(),
            format,
        }
    }

    /// Build from the `timestamp` block of a schema.
    pub fn from_properties(mut properties: Properties) -> Result<Self, ConfigurationError> {
        let key = properties
            .take(KEY_PARAM)
            .unwrap_or_else(|| KEY_DEFAULT.to_string());

        let format = match properties.take(FORMAT_PARAM) {
            None => TimestampFormat::Auto,
            Some(raw) => TimestampFormat::parse(&raw)
                .map_err(|reason| ConfigurationError::invalid(FORMAT_PARAM, raw, reason))?,
        };

        properties.confirm_all_used()?;

        Ok(Self { key, format })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn format(&self) -> &TimestampFormat {
        &self.format
    }

    /// Read the timestamp of `record`.
    pub fn extract(&self, record: &JsonRecord) -> Result<DateTime<Utc>, ExtractionError> {
        let element = record
            .get_element(&self.key)
            .ok_or_else(|| ExtractionError::MissingKey(self.key.clone()))?;

        let raw = scalar_to_string(element)
            .ok_or_else(|| ExtractionError::NotScalar(self.key.clone()))?;

        let parsed = match (&self.format, element) {
            (TimestampFormat::Auto, Json::Number(_)) => parse_epoch_millis(&raw),
            (TimestampFormat::Auto, _) => DateTime::parse_from_rfc3339(&raw)
                .ok()
                .map(|ts| ts.with_timezone(&Utc))
                .or_else(|| parse_epoch_millis(&raw)),
            (TimestampFormat::EpochMillis, _) => parse_epoch_millis(&raw),
            (TimestampFormat::EpochSeconds, _) => parse_epoch_seconds(&raw),
            (TimestampFormat::Rfc3339, _) => DateTime::parse_from_rfc3339(&raw)
                .ok()
                .map(|ts| ts.with_timezone(&Utc)),
            (TimestampFormat::Pattern(pattern), _) => parse_pattern(&raw, pattern),
        };

        parsed.ok_or_else(|| ExtractionError::InvalidTimestamp {
            key: self.key.clone(),
            raw,
            format: self.format.to_string(),
        })
    }
}

fn parse_epoch_millis(raw: &str) -> Option<DateTime<Utc>> {
    let millis = match raw.parse::<i64>() {
        Ok(millis) => millis,
        Err(_) => {
            let float = raw.parse::<f64>().ok().filter(|f| f.is_finite())?;
            float.round() as i64
        }
    };
    Utc.timestamp_millis_opt(millis).single()
}

fn parse_epoch_seconds(raw: &str) -> Option<DateTime<Utc>> {
    let seconds = raw.parse::<f64>().ok().filter(|f| f.is_finite())?;
    Utc.timestamp_millis_opt((seconds * 1000.0).round() as i64)
        .single()
}

fn parse_pattern(raw: &str, pattern: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, pattern)
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, pattern)
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(json: &str) -> JsonRecord {
        JsonRecord::from_json(json).unwrap()
    }

    fn millis(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_defaults() {
        let descriptor = TimestampDescriptor::from_properties(Properties::new()).unwrap();
        assert_eq!(descriptor.key(), "timestamp");
        assert_eq!(descriptor.format(), &TimestampFormat::Auto);
    }

    #[test]
    fn test_auto_number_is_epoch_millis() {
        let descriptor = TimestampDescriptor::default();
        let ts = descriptor.extract(&record(r#"{"timestamp": 1500}"#)).unwrap();
        assert_eq!(ts, millis(1500));
    }

    #[test]
    fn test_auto_string_is_rfc3339() {
        let descriptor = TimestampDescriptor::default();
        let ts = descriptor
            .extract(&record(r#"{"timestamp": "1970-01-01T00:00:01+00:00"}"#))
            .unwrap();
        assert_eq!(ts, millis(1000));
    }

    #[test]
    fn test_epoch_seconds() {
        let descriptor = TimestampDescriptor::new("data.time", TimestampFormat::EpochSeconds);
        let ts = descriptor
            .extract(&record(r#"{"data": {"time": 2.5}}"#))
            .unwrap();
        assert_eq!(ts, millis(2500));
    }

    #[test]
    fn test_pattern_without_zone_is_utc() {
        let props = Properties::new()
            .with("key", "time")
            .with("format", "%Y-%m-%d %H:%M:%S");
        let descriptor = TimestampDescriptor::from_properties(props).unwrap();
        let ts = descriptor
            .extract(&record(r#"{"time": "1970-01-01 00:01:00"}"#))
            .unwrap();
        assert_eq!(ts, millis(60_000));
    }

    #[test]
    fn test_missing_and_invalid() {
        let descriptor = TimestampDescriptor::default();
        assert_eq!(
            descriptor.extract(&record(r#"{"time": 1}"#)),
            Err(ExtractionError::MissingKey("timestamp".to_string()))
        );
        assert_eq!(
            descriptor.extract(&record(r#"{"timestamp": {"a": 1}}"#)),
            Err(ExtractionError::NotScalar("timestamp".to_string()))
        );
        assert!(matches!(
            descriptor.extract(&record(r#"{"timestamp": "yesterday"}"#)),
            Err(ExtractionError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_invalid_configuration() {
        let props = Properties::new().with("format", "%Q").with("zone", "UTC");
        let err = TimestampDescriptor::from_properties(props).unwrap_err();
        assert_eq!(err.params(), vec!["format"]);
    }
}
