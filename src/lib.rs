// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # MetricFlow - Metric extraction and defined metrics
//!
//! Turns heterogeneous JSON records into typed metrics and derives new
//! metrics from them with stateful, grouped equations.
//!
//! ## Key Features
//!
//! - **Schemas**: declarative extraction of values, attributes and timestamps
//! - **Attribute filters**: full-match regex rules with negation
//! - **Equations**: typed expression trees with error and absence propagation
//! - **Defined metrics**: grouped, windowed aggregations evaluated per key
//! - **Exceptions**: failures become rate-limited exception metrics
//!
//! ## Quick Start
//!
//! ```rust
//! use metricflow::{EngineConfig, MetricsEngine, Properties, Value};
//!
//! let properties: Properties = [
//!     ("metrics.schema.perf.sources", "hosts"),
//!     ("metrics.schema.perf.value.cpu.key", "cpu"),
//!     ("metrics.schema.perf.attributes.host", "host"),
//!     ("metrics.define.busy.metrics.groupby", "host"),
//!     ("metrics.define.busy.variables.cpu.filter.attribute.$value", "cpu"),
//!     ("metrics.define.busy.value", "cpu > 0.8"),
//! ]
//! .into_iter()
//! .collect();
//!
//! let mut engine = MetricsEngine::new(EngineConfig::default(), &properties);
//! let metrics = engine
//!     .process_json("hosts", r#"{"timestamp": 1000, "host": "h1", "cpu": 0.9}"#)
//!     .unwrap();
//!
//! assert_eq!(metrics[1].attribute("$defined_metric"), Some("busy"));
//! assert_eq!(metrics[1].value(), &Value::Boolean(true));
//! ```
//!
//! ## Modules
//!
//! - [`schema`]: Metric extraction from JSON records
//! - [`filter`]: Attribute filters
//! - [`equation`]: Typed equations
//! - [`defined`]: Defined metrics, variables, keyed updates and the definition cache
//! - [`state`]: Keyed state boundary
//! - [`exceptions`]: Exception rate limiting
//! - [`engine`]: Single-process wiring of all of the above

// Modules
pub mod component;
pub mod config;
pub mod defined;
pub mod engine;
pub mod equation;
pub mod error;
pub mod exceptions;
pub mod filter;
pub mod json;
pub mod metric;
pub mod properties;
pub mod schema;
pub mod state;
pub mod value;

// Re-exports for convenient access
pub use component::{Component, ComponentRegistry, HasStatus};
pub use config::{EngineConfig, ExceptionsConfig, StateConfig};
pub use defined::{
    Aggregation, DefinedMetric, DefinedMetricId, DefinedMetricUpdater, DefinedMetrics,
    DefinedMetricsPipeline, KeyEvent, MetricVariable, VariableStores,
};
pub use engine::MetricsEngine;
pub use equation::{Equation, Function, VariableSource};
pub use error::{
    ConfigurationError, EquationError, Error, ExtractionError, Result, StateError,
};
pub use exceptions::{Clock, ExceptionsCache, ManualClock, Owner, SystemClock};
pub use filter::AttributeFilter;
pub use json::JsonRecord;
pub use metric::{Attributes, Metric};
pub use properties::Properties;
pub use schema::{MetricSchema, MetricSchemas};
pub use state::{ExpiringStateStore, KeyedStateStore, MemoryStateStore};
pub use value::{Value, ValueType};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
