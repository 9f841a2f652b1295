// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Metric schemas.
//!
//! A schema turns one JSON record of a given source into zero or more
//! [`Metric`]s. It resolves attributes (fixed, direct key or key pattern),
//! filters on them, reads the record timestamp and then reads every
//! configured value.
//!
//! A schema never fails the stream. A configuration error is stored and
//! replayed as an exception metric, and runtime failures become exception
//! metrics too. Both are rate limited through the shared
//! [`ExceptionsCache`].
//!
//! Example configuration, relative to `metrics.schema.<id>`:
//!
//! ```text
//! sources = logs
//! timestamp.key = data.time
//! value.cpu.key = data.cpu
//! attributes.host = data.host
//! attributes.cluster = #prod
//! filter.attribute.host = !test.*
//! ```

pub mod timestamp;
pub mod value;

pub use timestamp::{TimestampDescriptor, TimestampFormat};
pub use value::{ValueDescriptor, ValueKind};

use log::error;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::component::Component;
use crate::error::{ConfigurationError, ExtractionError};
use crate::exceptions::{ExceptionsCache, Owner};
use crate::filter::{full_match_regex, AttributeFilter};
use crate::json::{scalar_to_string, JsonRecord};
use crate::metric::{Attributes, Metric, SCHEMA_ATTRIBUTE, VALUE_ATTRIBUTE};
use crate::properties::Properties;
use crate::value::Value;

pub const SOURCES_PARAM: &str = "sources";
pub const TIMESTAMP_PARAM: &str = "timestamp";
pub const VALUES_PARAM: &str = "value";
pub const ATTRIBUTES_PARAM: &str = "attributes";
pub const FILTER_PARAM: &str = "filter";

/// Prefix of all schemas in the global properties.
pub const SCHEMAS_PREFIX: &str = "metrics.schema";

/// Placeholder in pattern aliases, replaced by the captured key fragment.
const ALIAS_PLACEHOLDER: char = '+';

#[derive(Debug, Clone)]
struct AttributePattern {
    alias: String,
    source: String,
    pattern: Regex,
}

impl AttributePattern {
    /// Attribute name for a key matched by this pattern.
    fn alias_for(&self, key: &str) -> String {
        if self.alias.contains(ALIAS_PLACEHOLDER)
            && self.alias != self.source
            && self.pattern.captures_len() == 2
        {
            if let Some(group) = self.pattern.captures(key).and_then(|c| c.get(1)) {
                return self
                    .alias
                    .replace(ALIAS_PLACEHOLDER, group.as_str());
            }
        }
        key.to_string()
    }
}

/// Rule kinds for `attributes.<alias>`.
fn is_fixed_rule(rule: &str) -> bool {
    rule.starts_with('#')
}

fn is_pattern_rule(rule: &str) -> bool {
    rule.contains('*') || rule.contains('+') || rule.contains('(')
}

/// Extracts metrics from the records of one or more sources.
#[derive(Debug)]
pub struct MetricSchema {
    id: String,
    sources: Vec<String>,
    fixed_attributes: Attributes,
    /// (alias, key path)
    key_attributes: Vec<(String, String)>,
    pattern_attributes: Vec<AttributePattern>,
    timestamp: TimestampDescriptor,
    values: Vec<ValueDescriptor>,
    filter: AttributeFilter,
    exceptions: Arc<ExceptionsCache>,
    configuration_error: Option<ConfigurationError>,
}

impl MetricSchema {
    /// Unconfigured schema.
    pub fn new(id: impl Into<String>, exceptions: Arc<ExceptionsCache>) -> Self {
        let id = id.into();
        let mut fixed_attributes = Attributes::new();
        fixed_attributes.insert(SCHEMA_ATTRIBUTE.to_string(), id.clone());

        Self {
            id,
            sources: Vec::new(),
            fixed_attributes,
            key_attributes: Vec::new(),
            pattern_attributes: Vec::new(),
            timestamp: TimestampDescriptor::default(),
            values: Vec::new(),
            filter: AttributeFilter::new(),
            exceptions,
            configuration_error: None,
        }
    }

    /// Build and configure in one step. A configuration error is kept in
    /// the schema, not returned.
    pub fn build(
        id: impl Into<String>,
        properties: Properties,
        exceptions: Arc<ExceptionsCache>,
    ) -> Self {
        let mut schema = Self::new(id, exceptions);
        let _ = schema.configure(properties);
        schema
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn contains_source(&self, source_id: &str) -> bool {
        self.sources.iter().any(|s| s == source_id)
    }

    /// Error recorded by the last [`configure`](Self::configure) call.
    pub fn configuration_error(&self) -> Option<&ConfigurationError> {
        self.configuration_error.as_ref()
    }

    pub fn filter(&self) -> &AttributeFilter {
        &self.filter
    }

    /// Configure from the schema's own properties.
    ///
    /// On failure the error is recorded and replayed by every later
    /// [`extract`](Self::extract) call, and also returned.
    pub fn configure(&mut self, properties: Properties) -> Result<(), ConfigurationError> {
        self.fixed_attributes = Attributes::new();
        self.fixed_attributes
            .insert(SCHEMA_ATTRIBUTE.to_string(), self.id.clone());
        self.configuration_error = None;

        match self.try_configure(properties) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("{}: {}", self.id, e);
                self.configuration_error = Some(e.clone());
                Err(e)
            }
        }
    }

    fn try_configure(&mut self, mut properties: Properties) -> Result<(), ConfigurationError> {
        let mut errors = Vec::new();

        match properties.take(SOURCES_PARAM) {
            Some(sources) => self.sources = sources.split_whitespace().map(String::from).collect(),
            None => errors.push(ConfigurationError::missing(SOURCES_PARAM)),
        }

        match TimestampDescriptor::from_properties(properties.take_subset(TIMESTAMP_PARAM)) {
            Ok(timestamp) => self.timestamp = timestamp,
            Err(e) => errors.push(e.within(TIMESTAMP_PARAM)),
        }

        let values_props = properties.take_subset(VALUES_PARAM);
        let mut values = Vec::new();
        for value_id in values_props.ids() {
            match ValueDescriptor::from_properties(&value_id, values_props.subset(&value_id)) {
                Ok(descriptor) => values.push(descriptor),
                Err(e) => errors.push(e.within(&format!("{}.{}", VALUES_PARAM, value_id))),
            }
        }
        if values_props.is_empty() {
            errors.push(ConfigurationError::missing(VALUES_PARAM));
        }
        self.values = values;

        let mut fixed_attributes = self.fixed_attributes.clone();
        let mut key_attributes = Vec::new();
        let mut pattern_attributes = Vec::new();
        for (alias, rule) in properties.take_subset(ATTRIBUTES_PARAM).iter() {
            if is_fixed_rule(rule) {
                fixed_attributes.insert(alias.to_string(), rule[1..].to_string());
            } else if is_pattern_rule(rule) {
                match full_match_regex(rule) {
                    Ok(pattern) => pattern_attributes.push(AttributePattern {
                        alias: alias.to_string(),
                        source: rule.to_string(),
                        pattern,
                    }),
                    Err(e) => errors.push(ConfigurationError::invalid(
                        format!("{}.{}", ATTRIBUTES_PARAM, alias),
                        rule,
                        e.to_string(),
                    )),
                }
            } else {
                key_attributes.push((alias.to_string(), rule.to_string()));
            }
        }
        self.key_attributes = key_attributes;
        self.pattern_attributes = pattern_attributes;

        match AttributeFilter::from_properties(properties.take_subset(FILTER_PARAM)) {
            Ok(filter) => self.filter = filter,
            Err(e) => errors.push(e.within(FILTER_PARAM)),
        }

        if let Err(e) = properties.confirm_all_used() {
            errors.push(e);
        }

        ConfigurationError::collect(errors)?;
        self.fixed_attributes = fixed_attributes;
        Ok(())
    }

    /// Extract the metrics of one record.
    pub fn extract(&self, record: &JsonRecord) -> Vec<Metric> {
        if let Some(e) = &self.configuration_error {
            return self
                .raise(&Owner::Schema.key(&self.id), &e.to_string())
                .map(|value| {
                    vec![Metric::new(
                        self.exceptions.now(),
                        value,
                        self.fixed_attributes.clone(),
                    )]
                })
                .unwrap_or_default();
        }

        match self.try_extract(record) {
            Ok(metrics) => metrics,
            Err(e) => self
                .raise(&Owner::Schema.key(&self.id), &e.to_string())
                .map(|value| {
                    vec![Metric::new(
                        self.exceptions.now(),
                        value,
                        self.fixed_attributes.clone(),
                    )]
                })
                .unwrap_or_default(),
        }
    }

    fn try_extract(&self, record: &JsonRecord) -> Result<Vec<Metric>, ExtractionError> {
        let attributes = self.resolve_attributes(record);

        if !self.filter.test(&attributes) {
            return Ok(Vec::new());
        }

        let (timestamp, timestamp_error) = match self.timestamp.extract(record) {
            Ok(ts) => (ts, None),
            Err(e) => (self.exceptions.now(), Some(e)),
        };

        let mut metrics = Vec::with_capacity(self.values.len());
        for descriptor in &self.values {
            let mut metric_attributes = attributes.clone();
            metric_attributes.insert(VALUE_ATTRIBUTE.to_string(), descriptor.id().to_string());

            if let Some(e) = &timestamp_error {
                let owner = Owner::Schema.key(&format!("{}:{}", self.id, descriptor.id()));
                if let Some(value) = self.raise(&owner, &e.to_string()) {
                    metrics.push(Metric::new(timestamp, value, metric_attributes));
                }
                continue;
            }

            if let Some(value) = descriptor.extract(record)? {
                metrics.push(Metric::new(timestamp, value, metric_attributes));
            }
        }

        metrics.retain(|metric| self.filter.test_metric(metric));
        Ok(metrics)
    }

    fn resolve_attributes(&self, record: &JsonRecord) -> Attributes {
        let mut attributes = self.fixed_attributes.clone();

        for (alias, key) in &self.key_attributes {
            if let Some(value) = record.get_scalar(key) {
                attributes.insert(alias.clone(), value);
            }
        }

        for rule in &self.pattern_attributes {
            for key in record.keys_matching(&rule.pattern) {
                if let Some(value) = record.get_element(&key).and_then(scalar_to_string) {
                    attributes.insert(rule.alias_for(&key), value);
                }
            }
        }

        attributes
    }

    /// Exception value for `cause`, unless it was raised within the window.
    fn raise(&self, owner: &str, cause: &str) -> Option<Value> {
        if self.exceptions.try_raise(owner, cause) {
            error!("{}: {}", owner, cause);
            Some(Value::exception(cause))
        } else {
            None
        }
    }
}

impl Component for MetricSchema {
    fn id(&self) -> &str {
        &self.id
    }

    fn configure(&mut self, properties: Properties) -> Result<(), ConfigurationError> {
        MetricSchema::configure(self, properties)
    }
}

/// All configured schemas, by id.
#[derive(Debug, Default)]
pub struct MetricSchemas {
    schemas: BTreeMap<String, MetricSchema>,
}

impl MetricSchemas {
    /// Build every schema declared under `metrics.schema`.
    pub fn from_properties(properties: &Properties, exceptions: Arc<ExceptionsCache>) -> Self {
        let all = properties.subset(SCHEMAS_PREFIX);
        let schemas = all
            .ids()
            .into_iter()
            .map(|id| {
                let schema = MetricSchema::build(&id, all.subset(&id), exceptions.clone());
                (id, schema)
            })
            .collect();
        Self { schemas }
    }

    pub fn insert(&mut self, schema: MetricSchema) {
        self.schemas.insert(schema.id().to_string(), schema);
    }

    pub fn get(&self, id: &str) -> Option<&MetricSchema> {
        self.schemas.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricSchema> {
        self.schemas.values()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Extract `record` with every schema accepting `source_id`.
    pub fn extract(&self, source_id: &str, record: &JsonRecord) -> Vec<Metric> {
        self.schemas
            .values()
            .filter(|schema| schema.contains_source(source_id))
            .flat_map(|schema| schema.extract(record))
            .collect()
    }
}
