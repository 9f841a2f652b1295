// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Definition cache.
//!
//! Every key update looks its definition up by name, from any worker. The
//! definitions live behind an [`ArcSwap`]: lookups never lock, and a reload
//! swaps the whole set at once so a reader sees either the old set or the
//! new one.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use log::{error, info};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::variable::DEFAULT_MAX_SERIES;
use super::{DefinedMetric, DefinedMetricId, DEFINED_METRICS_PREFIX};
use crate::exceptions::{ExceptionsCache, Owner};
use crate::metric::{Attributes, Metric, DEFINED_METRIC_ATTRIBUTE, SCHEMA_ATTRIBUTE};
use crate::properties::Properties;
use crate::value::Value;

type Definitions = BTreeMap<String, Arc<DefinedMetric>>;

/// Shared, atomically replaceable set of defined metrics.
#[derive(Debug)]
pub struct DefinedMetrics {
    definitions: ArcSwap<Definitions>,
    exceptions: Arc<ExceptionsCache>,
    max_series: usize,
}

impl DefinedMetrics {
    /// Empty cache.
    pub fn new(exceptions: Arc<ExceptionsCache>) -> Self {
        Self {
            definitions: ArcSwap::from_pointee(Definitions::new()),
            exceptions,
            max_series: DEFAULT_MAX_SERIES,
        }
    }

    /// Default bound on series of aggregating variables, used by later
    /// reloads.
    pub fn with_max_series(mut self, max_series: usize) -> Self {
        self.max_series = max_series;
        self
    }

    /// Cache loaded from `metrics.define.*`.
    pub fn from_properties(properties: &Properties, exceptions: Arc<ExceptionsCache>) -> Self {
        let cache = Self::new(exceptions);
        cache.reload(properties);
        cache
    }

    /// Rebuild every definition from `metrics.define.*` and swap them in.
    pub fn reload(&self, properties: &Properties) {
        let all = properties.subset(DEFINED_METRICS_PREFIX);
        let definitions = all
            .ids()
            .into_iter()
            .map(|name| DefinedMetric::build(&name, all.subset(&name), self.max_series));
        self.replace(definitions);
    }

    /// Swap in a new set of definitions.
    pub fn replace(&self, definitions: impl IntoIterator<Item = DefinedMetric>) {
        let definitions: Definitions = definitions
            .into_iter()
            .map(|d| (d.name().to_string(), Arc::new(d)))
            .collect();

        let invalid = definitions.values().filter(|d| !d.is_valid()).count();
        info!(
            "loaded {} defined metrics ({} misconfigured)",
            definitions.len(),
            invalid
        );

        self.definitions.store(Arc::new(definitions));
    }

    /// Validly configured definition named `name`.
    pub fn get(&self, name: &str) -> Option<Arc<DefinedMetric>> {
        self.definitions
            .load()
            .get(name)
            .filter(|d| d.is_valid())
            .cloned()
    }

    /// Definition named `name`, valid or not.
    pub fn get_any(&self, name: &str) -> Option<Arc<DefinedMetric>> {
        self.definitions.load().get(name).cloned()
    }

    /// Current set of definitions.
    pub fn snapshot(&self) -> Arc<BTreeMap<String, Arc<DefinedMetric>>> {
        self.definitions.load_full()
    }

    pub fn len(&self) -> usize {
        self.definitions.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.load().is_empty()
    }

    /// Keys `metric` must be routed to, one per definition that takes it.
    pub fn ids_for(&self, metric: &Metric) -> Vec<DefinedMetricId> {
        self.definitions
            .load()
            .values()
            .filter_map(|definition| definition.id_for(metric))
            .collect()
    }

    /// Exception metrics for misconfigured definitions, each at most once per
    /// window.
    pub fn configuration_exceptions(&self, time: DateTime<Utc>) -> Vec<Metric> {
        self.definitions
            .load()
            .values()
            .filter_map(|definition| {
                let e = definition.configuration_error()?;
                let cause = e.to_string();
                let owner = Owner::DefinedMetric.key(definition.name());
                if !self.exceptions.try_raise(&owner, &cause) {
                    return None;
                }
                error!("{}: {}", definition.name(), cause);

                let mut attributes = Attributes::new();
                attributes.insert(
                    DEFINED_METRIC_ATTRIBUTE.to_string(),
                    definition.name().to_string(),
                );
                attributes.insert(SCHEMA_ATTRIBUTE.to_string(), definition.name().to_string());
                Some(Metric::new(time, Value::exception(cause), attributes))
            })
            .collect()
    }
}
