// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Value descriptors.

use regex::Regex;
use serde_json::Value as Json;

use crate::error::{ConfigurationError, ExtractionError};
use crate::json::{scalar_to_string, JsonRecord};
use crate::properties::Properties;
use crate::value::Value;

pub const KEY_PARAM: &str = "key";
pub const TYPE_PARAM: &str = "type";
pub const REGEX_PARAM: &str = "regex";

/// Conversion applied to the raw element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueKind {
    /// Follow the JSON type; strings are tried as numbers, then booleans.
    #[default]
    Auto,
    Numeric,
    Boolean,
}

impl ValueKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "numeric" | "float" | "number" => Some(Self::Numeric),
            "boolean" | "bool" => Some(Self::Boolean),
            _ => None,
        }
    }
}

/// Reads one named value out of a record.
#[derive(Debug, Clone)]
pub struct ValueDescriptor {
    id: String,
    key: String,
    kind: ValueKind,
    regex: Option<Regex>,
}

impl ValueDescriptor {
    pub fn new(id: impl Into<String>, key: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            kind,
            regex: None,
        }
    }

    /// Build from a `value.<id>` block.
    pub fn from_properties(
        id: impl Into<String>,
        mut properties: Properties,
    ) -> Result<Self, ConfigurationError> {
        let mut errors = Vec::new();

        let key = properties.take_required(KEY_PARAM);

        let kind = match properties.take(TYPE_PARAM) {
            None => ValueKind::Auto,
            Some(raw) => ValueKind::parse(&raw).unwrap_or_else(|| {
                errors.push(ConfigurationError::invalid(
                    TYPE_PARAM,
                    raw,
                    "expected auto, numeric or boolean",
                ));
                ValueKind::Auto
            }),
        };

        let regex = match properties.take(REGEX_PARAM) {
            None => None,
            Some(raw) => match Regex::new(&raw) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    errors.push(ConfigurationError::invalid(REGEX_PARAM, raw, e.to_string()));
                    None
                }
            },
        };

        if let Err(e) = properties.confirm_all_used() {
            errors.push(e);
        }

        let key = match key {
            Ok(key) => key,
            Err(e) => {
                errors.insert(0, e);
                String::new()
            }
        };
        ConfigurationError::collect(errors)?;

        Ok(Self {
            id: id.into(),
            key,
            kind,
            regex,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Extract the value from `record`.
    ///
    /// A missing, null or non-scalar element, or a regex that does not
    /// match, yields `Ok(None)`. A present element that cannot be converted
    /// is an error.
    pub fn extract(&self, record: &JsonRecord) -> Result<Option<Value>, ExtractionError> {
        let element = match record.get_element(&self.key) {
            Some(element) => element,
            None => return Ok(None),
        };
        let raw = match scalar_to_string(element) {
            Some(raw) => raw,
            None => return Ok(None),
        };

        match &self.regex {
            Some(regex) => match regex.captures(&raw) {
                Some(captures) => {
                    let text = captures
                        .get(1)
                        .or_else(|| captures.get(0))
                        .map(|m| m.as_str())
                        .unwrap_or_default();
                    self.convert(&Json::String(text.to_string()), text).map(Some)
                }
                None => Ok(None),
            },
            None => self.convert(element, &raw).map(Some),
        }
    }

    fn convert(&self, element: &Json, raw: &str) -> Result<Value, ExtractionError> {
        let invalid_number = || ExtractionError::InvalidNumber {
            key: self.key.clone(),
            raw: raw.to_string(),
        };
        let invalid_boolean = || ExtractionError::InvalidBoolean {
            key: self.key.clone(),
            raw: raw.to_string(),
        };

        match (self.kind, element) {
            (ValueKind::Auto, Json::Bool(b)) => Ok(Value::Boolean(*b)),
            (ValueKind::Auto, Json::Number(_)) | (ValueKind::Numeric, _) => parse_number(raw)
                .map(Value::Numeric)
                .ok_or_else(invalid_number),
            (ValueKind::Boolean, _) => parse_boolean(raw)
                .map(Value::Boolean)
                .ok_or_else(invalid_boolean),
            (ValueKind::Auto, _) => parse_number(raw)
                .map(Value::Numeric)
                .or_else(|| parse_boolean(raw).map(Value::Boolean))
                .ok_or_else(invalid_number),
        }
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_boolean(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JsonRecord {
        JsonRecord::from_json(
            r#"{
                "cpu": 0.5,
                "up": true,
                "load": "1.25",
                "state": "FALSE",
                "msg": "took 35ms",
                "nested": {"a": 1},
                "nothing": null
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_auto_follows_json_type() {
        let r = record();
        let extract = |key: &str| {
            ValueDescriptor::new("v", key, ValueKind::Auto)
                .extract(&r)
                .unwrap()
        };
        assert_eq!(extract("cpu"), Some(Value::Numeric(0.5)));
        assert_eq!(extract("up"), Some(Value::Boolean(true)));
        assert_eq!(extract("load"), Some(Value::Numeric(1.25)));
        assert_eq!(extract("state"), Some(Value::Boolean(false)));
    }

    #[test]
    fn test_absent_elements() {
        let r = record();
        for key in ["missing", "nested", "nothing"] {
            let descriptor = ValueDescriptor::new("v", key, ValueKind::Auto);
            assert_eq!(descriptor.extract(&r).unwrap(), None, "{}", key);
        }
    }

    #[test]
    fn test_conversion_failures() {
        let r = record();
        let numeric = ValueDescriptor::new("v", "up", ValueKind::Numeric);
        assert!(matches!(
            numeric.extract(&r),
            Err(ExtractionError::InvalidNumber { .. })
        ));

        let boolean = ValueDescriptor::new("v", "cpu", ValueKind::Boolean);
        assert!(matches!(
            boolean.extract(&r),
            Err(ExtractionError::InvalidBoolean { .. })
        ));

        let auto = ValueDescriptor::new("v", "msg", ValueKind::Auto);
        assert!(auto.extract(&r).is_err());
    }

    #[test]
    fn test_regex_extracts_first_group() {
        let props = Properties::new()
            .with("key", "msg")
            .with("regex", r"took (\d+)ms");
        let descriptor = ValueDescriptor::from_properties("latency", props).unwrap();
        assert_eq!(descriptor.id(), "latency");
        assert_eq!(
            descriptor.extract(&record()).unwrap(),
            Some(Value::Numeric(35.0))
        );

        let props = Properties::new().with("key", "msg").with("regex", r"\d+");
        let descriptor = ValueDescriptor::from_properties("latency", props).unwrap();
        assert_eq!(
            descriptor.extract(&record()).unwrap(),
            Some(Value::Numeric(35.0))
        );

        let props = Properties::new().with("key", "msg").with("regex", r"failed");
        let descriptor = ValueDescriptor::from_properties("latency", props).unwrap();
        assert_eq!(descriptor.extract(&record()).unwrap(), None);
    }

    #[test]
    fn test_configuration_errors_collected() {
        let props = Properties::new()
            .with("type", "string")
            .with("regex", "(")
            .with("other", "x");
        match ValueDescriptor::from_properties("v", props) {
            Err(ConfigurationError::Multiple(errors)) => {
                let params: Vec<&str> = errors.iter().flat_map(|e| e.params()).collect();
                assert_eq!(params, vec!["key", "type", "regex", "other"]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
