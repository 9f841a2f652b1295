// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! In-process host for the update step.
//!
//! Routes each metric to the keys of the definitions that take it, runs
//! the updates one after the other against a single state store, and turns
//! idle keys into timeout events.

use chrono::Duration;
use log::{debug, error};
use std::sync::Arc;

use super::cache::DefinedMetrics;
use super::update::{DefinedMetricUpdater, KeyEvent};
use super::variable::VariableStores;
use super::DefinedMetricId;
use crate::metric::Metric;
use crate::state::{ExpiringStateStore, MemoryStateStore};

/// Default store of the pipeline.
pub type DefaultStateStore = MemoryStateStore<DefinedMetricId, VariableStores>;

/// Sequential defined metrics pipeline.
#[derive(Debug)]
pub struct DefinedMetricsPipeline<S = DefaultStateStore> {
    updater: DefinedMetricUpdater,
    store: S,
    timeout: Duration,
}

impl DefinedMetricsPipeline<DefaultStateStore> {
    /// Pipeline on an in-memory store.
    pub fn in_memory(definitions: Arc<DefinedMetrics>, timeout: Duration) -> Self {
        Self::new(definitions, MemoryStateStore::new(), timeout)
    }
}

impl<S> DefinedMetricsPipeline<S>
where
    S: ExpiringStateStore<DefinedMetricId, VariableStores>,
{
    /// `timeout` is how long a key may stay idle before its state is dropped.
    pub fn new(definitions: Arc<DefinedMetrics>, store: S, timeout: Duration) -> Self {
        Self {
            updater: DefinedMetricUpdater::new(definitions),
            store,
            timeout,
        }
    }

    pub fn definitions(&self) -> &Arc<DefinedMetrics> {
        self.updater.definitions()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Derived metrics of `metrics`, lazily and in input order.
    ///
    /// A key whose state cannot be written is logged and skipped.
    pub fn process<'a, I>(&'a mut self, metrics: I) -> impl Iterator<Item = Metric> + 'a
    where
        I: IntoIterator<Item = Metric>,
        I::IntoIter: 'a,
    {
        metrics
            .into_iter()
            .flat_map(move |metric| self.process_one(&metric))
    }

    /// Derived metrics of one metric, one per key it updates.
    pub fn process_one(&mut self, metric: &Metric) -> Vec<Metric> {
        let ids = self.updater.definitions().ids_for(metric);

        let mut derived = Vec::new();
        for id in ids {
            match self
                .updater
                .update(&id, KeyEvent::Metric(metric), &mut self.store)
            {
                Ok(Some(m)) => derived.push(m),
                Ok(None) => {}
                Err(e) => error!("{}: failed to store state: {}", id, e),
            }
        }
        derived
    }

    /// Deliver a timeout to every key idle for longer than the timeout.
    /// Returns the number of keys expired.
    pub fn expire_idle(&mut self) -> usize {
        let idle = self.store.idle_keys(self.timeout);
        let mut expired = 0;
        for id in idle {
            match self.updater.update(&id, KeyEvent::Timeout, &mut self.store) {
                Ok(_) => expired += 1,
                Err(e) => error!("{}: failed to remove state: {}", id, e),
            }
        }
        if expired > 0 {
            debug!("expired {} idle defined metric keys", expired);
        }
        expired
    }
}
