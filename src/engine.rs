// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! End-to-end engine.
//!
//! Wires schemas, defined metrics and the exceptions cache together for a
//! single process: records go in, extracted and derived metrics come out.
//!
//! # Example
//!
//! ```
//! use metricflow::{EngineConfig, MetricsEngine, Properties};
//!
//! let properties: Properties = [
//!     ("metrics.schema.s.sources", "events"),
//!     ("metrics.schema.s.value.cpu.key", "cpu"),
//!     ("metrics.schema.s.attributes.host", "host"),
//!     ("metrics.define.total.variables.v.aggregate", "sum"),
//! ]
//! .into_iter()
//! .collect();
//!
//! let mut engine = MetricsEngine::new(EngineConfig::default(), &properties);
//! let metrics = engine
//!     .process_json("events", r#"{"timestamp": 1000, "host": "h1", "cpu": 0.5}"#)
//!     .unwrap();
//! assert_eq!(metrics.len(), 2);
//! ```

use log::info;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::defined::{DefaultStateStore, DefinedMetrics, DefinedMetricsPipeline};
use crate::error::Result;
use crate::exceptions::{Clock, ExceptionsCache, SystemClock};
use crate::json::JsonRecord;
use crate::metric::Metric;
use crate::properties::Properties;
use crate::schema::MetricSchemas;
use crate::state::MemoryStateStore;

/// Single-process metrics engine.
#[derive(Debug)]
pub struct MetricsEngine {
    config: EngineConfig,
    exceptions: Arc<ExceptionsCache>,
    schemas: MetricSchemas,
    definitions: Arc<DefinedMetrics>,
    pipeline: DefinedMetricsPipeline<DefaultStateStore>,
}

impl MetricsEngine {
    /// Engine on the system clock.
    pub fn new(config: EngineConfig, properties: &Properties) -> Self {
        Self::with_clock(config, properties, Arc::new(SystemClock))
    }

    /// Engine whose exceptions and state expiry follow `clock`.
    pub fn with_clock(config: EngineConfig, properties: &Properties, clock: Arc<dyn Clock>) -> Self {
        let exceptions = Arc::new(ExceptionsCache::with_clock(
            config.exceptions_window(),
            clock.clone(),
        ));
        let schemas = MetricSchemas::from_properties(properties, exceptions.clone());

        let definitions = DefinedMetrics::new(exceptions.clone())
            .with_max_series(config.state.max_series);
        definitions.reload(properties);
        let definitions = Arc::new(definitions);

        let store: DefaultStateStore = MemoryStateStore::new().with_clock(clock);
        let pipeline =
            DefinedMetricsPipeline::new(definitions.clone(), store, config.state_timeout());

        info!(
            "engine started with {} schemas and {} defined metrics",
            schemas.len(),
            definitions.len()
        );

        Self {
            config,
            exceptions,
            schemas,
            definitions,
            pipeline,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn exceptions(&self) -> &Arc<ExceptionsCache> {
        &self.exceptions
    }

    pub fn schemas(&self) -> &MetricSchemas {
        &self.schemas
    }

    pub fn definitions(&self) -> &Arc<DefinedMetrics> {
        &self.definitions
    }

    pub fn pipeline(&self) -> &DefinedMetricsPipeline<DefaultStateStore> {
        &self.pipeline
    }

    /// Rebuild schemas and defined metrics from `properties`.
    ///
    /// Keyed state is kept; keys of definitions that disappeared are evicted
    /// on their next metric.
    pub fn reload(&mut self, properties: &Properties) {
        self.schemas = MetricSchemas::from_properties(properties, self.exceptions.clone());
        self.definitions.reload(properties);
        info!(
            "engine reloaded with {} schemas and {} defined metrics",
            self.schemas.len(),
            self.definitions.len()
        );
    }

    /// Metrics extracted from `record` by the schemas of `source_id`.
    pub fn extract(&self, source_id: &str, record: &JsonRecord) -> Vec<Metric> {
        self.schemas.extract(source_id, record)
    }

    /// Extracted metrics, then the metrics derived from them, then any
    /// pending configuration exceptions of defined metrics.
    pub fn process(&mut self, source_id: &str, record: &JsonRecord) -> Vec<Metric> {
        let extracted = self.extract(source_id, record);

        let mut derived = Vec::new();
        for metric in &extracted {
            derived.extend(self.pipeline.process_one(metric));
        }

        let mut output = extracted;
        output.extend(derived);
        output.extend(
            self.definitions
                .configuration_exceptions(self.exceptions.now()),
        );
        output
    }

    /// Same as [`process`](Self::process) on a JSON document.
    pub fn process_json(&mut self, source_id: &str, json: &str) -> Result<Vec<Metric>> {
        let record = JsonRecord::from_json(json)?;
        Ok(self.process(source_id, &record))
    }

    /// Drop the state of keys idle for longer than the configured timeout.
    pub fn expire_idle(&mut self) -> usize {
        self.pipeline.expire_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::exceptions::ManualClock;
    use crate::value::Value;
    use chrono::{Duration, TimeZone, Utc};

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    fn sample() -> Properties {
        props(&[
            ("metrics.schema.s.sources", "events"),
            ("metrics.schema.s.value.cpu.key", "cpu"),
            ("metrics.schema.s.attributes.host", "host"),
            ("metrics.define.total.variables.v.aggregate", "sum"),
        ])
    }

    fn engine(clock: Arc<ManualClock>) -> MetricsEngine {
        MetricsEngine::with_clock(EngineConfig::default(), &sample(), clock)
    }

    #[test]
    fn test_process_extracts_then_derives() {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(0, 0).unwrap()));
        let mut engine = engine(clock);

        let metrics = engine
            .process_json("events", r#"{"timestamp": 1000, "host": "h1", "cpu": 0.5}"#)
            .unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].attribute("$schema"), Some("s"));
        assert_eq!(metrics[1].attribute("$defined_metric"), Some("total"));
        assert_eq!(metrics[1].value(), &Value::Numeric(0.5));

        // One series per host
        let metrics = engine
            .process_json("events", r#"{"timestamp": 2000, "host": "h2", "cpu": 0.25}"#)
            .unwrap();
        assert_eq!(metrics[1].value(), &Value::Numeric(0.75));

        let metrics = engine
            .process_json("events", r#"{"timestamp": 3000, "host": "h1", "cpu": 1.0}"#)
            .unwrap();
        assert_eq!(metrics[1].value(), &Value::Numeric(1.25));
    }

    #[test]
    fn test_every_output_names_its_producer() {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(0, 0).unwrap()));
        let mut properties = sample();
        properties.set("metrics.schema.broken.sources", "events");
        properties.set("metrics.define.bad.variables.v.aggregate", "median");
        let mut engine = MetricsEngine::with_clock(EngineConfig::default(), &properties, clock);

        let records = [
            r#"{"timestamp": 1000, "host": "h1", "cpu": 0.5}"#,
            r#"{"timestamp": "later", "host": "h1", "cpu": 0.5}"#,
            r#"{"timestamp": 2000, "host": "h1", "cpu": "high"}"#,
        ];
        for record in records {
            let metrics = engine.process_json("events", record).unwrap();
            assert!(!metrics.is_empty());
            assert!(metrics.iter().all(Metric::has_schema));
        }
    }

    #[test]
    fn test_earliest_timestamp_keeps_stream_alive() {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(0, 0).unwrap()));
        let mut engine = engine(clock);
        let earliest = chrono::DateTime::<Utc>::MIN_UTC.timestamp_millis();

        let metrics = engine
            .process_json(
                "events",
                &format!(r#"{{"timestamp": {}, "host": "h1", "cpu": 1}}"#, earliest),
            )
            .unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[1].value(), &Value::Numeric(1.0));

        let metrics = engine
            .process_json("events", r#"{"timestamp": 1000, "host": "h2", "cpu": 2}"#)
            .unwrap();
        assert_eq!(metrics.len(), 2);
    }

    #[test]
    fn test_huge_expire_keeps_stream_alive() {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(0, 0).unwrap()));
        let properties = props(&[
            ("metrics.schema.s.sources", "events"),
            ("metrics.schema.s.value.cpu.key", "cpu"),
            ("metrics.schema.s.attributes.host", "host"),
            ("metrics.define.total.variables.v.aggregate", "sum"),
            ("metrics.define.total.variables.v.expire", "100000000d"),
        ]);
        let mut engine = MetricsEngine::with_clock(EngineConfig::default(), &properties, clock);
        assert!(engine.definitions().get("total").is_some());

        engine
            .process_json("events", r#"{"timestamp": 1000, "host": "h1", "cpu": 1}"#)
            .unwrap();
        let metrics = engine
            .process_json("events", r#"{"timestamp": 2000, "host": "h2", "cpu": 2}"#)
            .unwrap();
        assert_eq!(metrics[1].value(), &Value::Numeric(3.0));
    }

    #[test]
    fn test_unknown_source() {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(0, 0).unwrap()));
        let mut engine = engine(clock);
        let metrics = engine
            .process_json("other", r#"{"timestamp": 1000, "cpu": 0.5}"#)
            .unwrap();
        assert!(metrics.is_empty());
    }

    #[test]
    fn test_malformed_json() {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(0, 0).unwrap()));
        let mut engine = engine(clock);
        assert!(matches!(
            engine.process_json("events", "{"),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_reload_drops_definition() {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(0, 0).unwrap()));
        let mut engine = engine(clock);
        engine
            .process_json("events", r#"{"timestamp": 1000, "host": "h1", "cpu": 0.5}"#)
            .unwrap();
        assert_eq!(engine.pipeline().store().len(), 1);

        engine.reload(&props(&[
            ("metrics.schema.s.sources", "events"),
            ("metrics.schema.s.value.cpu.key", "cpu"),
        ]));
        assert!(engine.definitions().is_empty());

        let metrics = engine
            .process_json("events", r#"{"timestamp": 2000, "cpu": 0.5}"#)
            .unwrap();
        assert_eq!(metrics.len(), 1);
    }

    #[test]
    fn test_configuration_exceptions_emitted_once_per_window() {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(0, 0).unwrap()));
        let mut properties = sample();
        properties.set("metrics.define.broken.variables.v.aggregate", "median");
        let mut engine = MetricsEngine::with_clock(EngineConfig::default(), &properties, clock.clone());

        let record = r#"{"timestamp": 1000, "host": "h1", "cpu": 0.5}"#;
        let first = engine.process_json("events", record).unwrap();
        assert!(first.last().unwrap().value().is_exception());
        assert_eq!(first.last().unwrap().attribute("$defined_metric"), Some("broken"));

        let second = engine.process_json("events", record).unwrap();
        assert!(second.iter().all(|m| !m.value().is_exception()));

        clock.advance(Duration::minutes(1));
        let third = engine.process_json("events", record).unwrap();
        assert!(third.last().unwrap().value().is_exception());
    }

    #[test]
    fn test_same_name_schema_and_definition_both_reported() {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(0, 0).unwrap()));
        let mut properties = sample();
        properties.set("metrics.schema.load.sources", "events");
        properties.set("metrics.define.load.variables.v.aggregate", "median");
        let mut engine = MetricsEngine::with_clock(EngineConfig::default(), &properties, clock);

        let metrics = engine
            .process_json("events", r#"{"timestamp": 1000, "host": "h1", "cpu": 0.5}"#)
            .unwrap();
        let exceptions: Vec<&Metric> = metrics
            .iter()
            .filter(|m| m.value().is_exception() && m.attribute("$schema") == Some("load"))
            .collect();
        assert_eq!(exceptions.len(), 2);
        assert_eq!(exceptions[0].attribute("$defined_metric"), None);
        assert_eq!(exceptions[1].attribute("$defined_metric"), Some("load"));
    }

    #[test]
    fn test_expire_idle() {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(0, 0).unwrap()));
        let mut engine = engine(clock.clone());
        engine
            .process_json("events", r#"{"timestamp": 1000, "host": "h1", "cpu": 0.5}"#)
            .unwrap();

        assert_eq!(engine.expire_idle(), 0);
        clock.advance(Duration::hours(2));
        assert_eq!(engine.expire_idle(), 1);
    }
}
