// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Metric type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::value::Value;

/// Attribute naming the schema (or defined metric) that produced a metric.
pub const SCHEMA_ATTRIBUTE: &str = "$schema";

/// Attribute naming the value descriptor a schema metric was read with.
pub const VALUE_ATTRIBUTE: &str = "$value";

/// Attribute naming the defined metric a derived metric was computed by.
pub const DEFINED_METRIC_ATTRIBUTE: &str = "$defined_metric";

/// Attribute map of a metric. Ordered so that output is deterministic.
pub type Attributes = BTreeMap<String, String>;

/// A single timestamped, attributed value. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    timestamp: DateTime<Utc>,
    value: Value,
    attributes: Attributes,
}

impl Metric {
    /// Build a metric.
    ///
    /// Attributes are taken as given. Metrics entering the pipeline must
    /// carry [`SCHEMA_ATTRIBUTE`]; schemas and defined metrics always set it,
    /// other producers have to set it themselves.
    pub fn new(timestamp: DateTime<Utc>, value: impl Into<Value>, attributes: Attributes) -> Self {
        Self {
            timestamp,
            value: value.into(),
            attributes,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Look up a single attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Decompose into its parts.
    /// Whether the metric names the schema or definition that produced it.
    pub fn has_schema(&self) -> bool {
        self.attributes.contains_key(SCHEMA_ATTRIBUTE)
    }

    pub fn into_parts(self) -> (DateTime<Utc>, Value, Attributes) {
        (self.timestamp, self.value, self.attributes)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Build an attribute map from pairs. Handy in tests and examples.
pub fn attributes<K, V, I>(pairs: I) -> Attributes
where
    K: Into<String>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_metric_accessors() {
        let ts = Utc.timestamp_millis_opt(1_000).unwrap();
        let metric = Metric::new(ts, 3.5, attributes([("host", "a")]));

        assert_eq!(metric.timestamp(), ts);
        assert_eq!(metric.value(), &Value::Numeric(3.5));
        assert_eq!(metric.attribute("host"), Some("a"));
        assert_eq!(metric.attribute("missing"), None);
    }

    #[test]
    fn test_metric_json() {
        let ts = Utc.timestamp_millis_opt(1_000).unwrap();
        let metric = Metric::new(ts, true, attributes([(SCHEMA_ATTRIBUTE, "s")]));

        let json = metric.to_json().unwrap();
        assert!(json.contains("$schema"));

        let parsed = Metric::from_json(&json).unwrap();
        assert_eq!(parsed, metric);
    }
}
