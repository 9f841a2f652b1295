// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Attribute filters.
//!
//! A filter is a conjunction of rules, one per attribute:
//! - `host = web.*`: `host` must exist and fully match `web.*`
//! - `host = !web.*`: `host` must be missing, or not fully match `web.*`
//!
//! A filter without rules accepts everything.

use regex::Regex;
use std::fmt;

use crate::error::ConfigurationError;
use crate::metric::{Attributes, Metric};
use crate::properties::Properties;

/// Prefix of the rule keys inside a `filter` block.
pub const ATTRIBUTE_PARAM: &str = "attribute";

/// Compile `pattern` for whole-string matching.
pub fn full_match_regex(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{})$", pattern))
}

#[derive(Debug, Clone)]
enum Rule {
    Match { key: String, pattern: Regex },
    NotMatch { key: String, pattern: Regex },
}

impl Rule {
    fn test(&self, attributes: &Attributes) -> bool {
        match self {
            Rule::Match { key, pattern } => attributes
                .get(key)
                .map(|value| pattern.is_match(value))
                .unwrap_or(false),
            Rule::NotMatch { key, pattern } => attributes
                .get(key)
                .map(|value| !pattern.is_match(value))
                .unwrap_or(true),
        }
    }
}

/// Conjunction of attribute rules.
#[derive(Debug, Clone, Default)]
pub struct AttributeFilter {
    rules: Vec<Rule>,
    /// Source text of every rule, for display.
    sources: Vec<(String, String)>,
}

impl AttributeFilter {
    /// Filter that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule. A leading `!` turns it into a negative rule.
    pub fn add_rule(&mut self, key: &str, rule_value: &str) -> Result<(), ConfigurationError> {
        let param = format!("{}.{}", ATTRIBUTE_PARAM, key);
        let compile = |pattern: &str| {
            full_match_regex(pattern)
                .map_err(|e| ConfigurationError::invalid(param.clone(), rule_value, e.to_string()))
        };

        let rule = match rule_value.strip_prefix('!') {
            Some(negated) => Rule::NotMatch {
                key: key.to_string(),
                pattern: compile(negated)?,
            },
            None => Rule::Match {
                key: key.to_string(),
                pattern: compile(rule_value)?,
            },
        };

        self.rules.push(rule);
        self.sources.push((key.to_string(), rule_value.to_string()));
        Ok(())
    }

    /// Builder: add a rule.
    pub fn with_rule(mut self, key: &str, rule_value: &str) -> Result<Self, ConfigurationError> {
        self.add_rule(key, rule_value)?;
        Ok(self)
    }

    /// Build from the properties of a `filter` block.
    ///
    /// Every `attribute.<name>` entry becomes a rule. Invalid patterns are
    /// all reported together, and any other key is reported as unused.
    pub fn from_properties(mut properties: Properties) -> Result<Self, ConfigurationError> {
        let rules = properties.take_subset(ATTRIBUTE_PARAM);

        let mut filter = AttributeFilter::new();
        let mut errors = Vec::new();
        for (key, value) in rules.iter() {
            if let Err(e) = filter.add_rule(key, value) {
                errors.push(e);
            }
        }
        if let Err(e) = properties.confirm_all_used() {
            errors.push(e);
        }

        ConfigurationError::collect(errors)?;
        Ok(filter)
    }

    /// Evaluate the filter on an attribute map.
    pub fn test(&self, attributes: &Attributes) -> bool {
        self.rules.iter().all(|rule| rule.test(attributes))
    }

    /// Evaluate the filter on a metric's attributes.
    pub fn test_metric(&self, metric: &Metric) -> bool {
        self.test(metric.attributes())
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

impl fmt::Display for AttributeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sources.is_empty() {
            return f.write_str("*");
        }
        let rules: Vec<String> = self
            .sources
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        f.write_str(&rules.join(" & "))
    }
}
