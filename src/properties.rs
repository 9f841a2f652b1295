// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Hierarchical string properties.
//!
//! Components are configured from flat `key = value` pairs whose keys form
//! a dotted hierarchy (`metrics.schema.perf.value.cpu.key`). Configuration
//! consumes the keys it recognizes with the `take*` methods; whatever is
//! left is reported by [`Properties::confirm_all_used`].

use chrono::Duration;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use crate::error::ConfigurationError;

/// Ordered set of configuration properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a property.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Set a property, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove and return a property.
    pub fn take(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// Remove and return a property that must be present.
    pub fn take_required(&mut self, key: &str) -> Result<String, ConfigurationError> {
        self.take(key)
            .ok_or_else(|| ConfigurationError::missing(key))
    }

    /// Remove and parse a duration property (`30s`, `10m`, `1h`, `2d`, `500ms`
    /// or bare seconds).
    pub fn take_duration(&mut self, key: &str) -> Result<Option<Duration>, ConfigurationError> {
        match self.take(key) {
            None => Ok(None),
            Some(raw) => parse_duration(&raw)
                .map(Some)
                .ok_or_else(|| ConfigurationError::invalid(key, raw, "not a duration")),
        }
    }

    /// Remove and parse a property with [`FromStr`].
    pub fn take_parsed<T>(&mut self, key: &str) -> Result<Option<T>, ConfigurationError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.take(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigurationError::invalid(key, raw.clone(), e.to_string())),
        }
    }

    /// Copy of every property under `prefix.`, with the prefix stripped.
    pub fn subset(&self, prefix: &str) -> Properties {
        let dotted = format!("{}.", prefix);
        self.entries
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(&dotted)
                    .map(|rest| (rest.to_string(), value.clone()))
            })
            .collect()
    }

    /// Remove every property under `prefix.` and return them, prefix stripped.
    pub fn take_subset(&mut self, prefix: &str) -> Properties {
        let dotted = format!("{}.", prefix);
        let keys: Vec<String> = self
            .entries
            .keys()
            .filter(|key| key.starts_with(&dotted))
            .cloned()
            .collect();

        let mut subset = Properties::new();
        for key in keys {
            if let Some(value) = self.entries.remove(&key) {
                subset.set(&key[dotted.len()..], value);
            }
        }
        subset
    }

    /// Distinct first segments of all keys.
    ///
    /// For `value.cpu.key` and `value.mem.key` under `value`, returns
    /// `{cpu, mem}`.
    pub fn ids(&self) -> BTreeSet<String> {
        self.entries
            .keys()
            .map(|key| key.split('.').next().unwrap_or(key).to_string())
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fail if any property was left unconsumed.
    pub fn confirm_all_used(&self) -> Result<(), ConfigurationError> {
        if self.entries.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::Unused(
                self.entries.keys().cloned().collect(),
            ))
        }
    }

    /// Flatten a JSON object into dotted keys.
    ///
    /// Scalars become their string form, arrays of scalars are joined with
    /// spaces (the list separator used by `sources` and `groupby`), and
    /// nulls are skipped.
    pub fn from_json(value: &serde_json::Value) -> Properties {
        let mut properties = Properties::new();
        flatten_json(value, None, &mut properties);
        properties
    }
}

fn flatten_json(value: &serde_json::Value, prefix: Option<&str>, out: &mut Properties) {
    use serde_json::Value as Json;

    match value {
        Json::Object(map) => {
            for (key, child) in map {
                let path = match prefix {
                    Some(p) => format!("{}.{}", p, key),
                    None => key.clone(),
                };
                flatten_json(child, Some(&path), out);
            }
        }
        Json::Array(items) => {
            if let Some(p) = prefix {
                let joined = items
                    .iter()
                    .filter_map(scalar_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                out.set(p, joined);
            }
        }
        other => {
            if let (Some(p), Some(s)) = (prefix, scalar_string(other)) {
                out.set(p, s);
            }
        }
    }
}

fn scalar_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse `key = value` lines. Blank lines and lines starting with `#` or
/// `!` are ignored.
impl FromStr for Properties {
    type Err = ConfigurationError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut properties = Properties::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                ConfigurationError::invalid(
                    format!("line {}", number + 1),
                    line,
                    "expected key = value",
                )
            })?;
            properties.set(key.trim(), value.trim());
        }
        Ok(properties)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Parse a duration such as `30s`, `10m`, `1h`, `2d`, `250ms` or `45`
/// (seconds).
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let amount: i64 = digits.parse().ok()?;

    match unit.trim() {
        "ms" => Duration::try_milliseconds(amount),
        "" | "s" => Duration::try_seconds(amount),
        "m" => Duration::try_seconds(amount.checked_mul(60)?),
        "h" => Duration::try_seconds(amount.checked_mul(3_600)?),
        "d" => Duration::try_seconds(amount.checked_mul(86_400)?),
        _ => None,
    }
}
