// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Keyed update step of defined metrics.
//!
//! For one key and one event:
//! - timeout: the store is removed and nothing is emitted
//! - metric for a definition that no longer exists (or is misconfigured):
//!   the store is removed and nothing is emitted
//! - otherwise the store is loaded (empty when missing), updated, the
//!   equation evaluated, the store written back and the derived metric, if
//!   any, returned
//!
//! The host must never run two updates for the same key at once.

use log::{debug, warn};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::cache::DefinedMetrics;
use super::variable::VariableStores;
use super::DefinedMetricId;
use crate::error::StateError;
use crate::metric::Metric;
use crate::state::KeyedStateStore;

/// Event delivered by the host for one key.
#[derive(Debug, Clone, Copy)]
pub enum KeyEvent<'a> {
    Metric(&'a Metric),
    /// No metric arrived within the inactivity window.
    Timeout,
}

/// Applies events to the variable stores of defined metric keys.
#[derive(Debug, Clone)]
pub struct DefinedMetricUpdater {
    definitions: Arc<DefinedMetrics>,
}

impl DefinedMetricUpdater {
    pub fn new(definitions: Arc<DefinedMetrics>) -> Self {
        Self { definitions }
    }

    pub fn definitions(&self) -> &Arc<DefinedMetrics> {
        &self.definitions
    }

    /// Apply `event` to the state of `id`.
    ///
    /// Only failures to write the store are returned; a stored state that
    /// cannot be read is logged and replaced by an empty one.
    pub fn update<S>(
        &self,
        id: &DefinedMetricId,
        event: KeyEvent<'_>,
        store: &mut S,
    ) -> Result<Option<Metric>, StateError>
    where
        S: KeyedStateStore<DefinedMetricId, VariableStores> + ?Sized,
    {
        let metric = match event {
            KeyEvent::Timeout => {
                debug!("{}: timed out, removing state", id);
                store.remove(id)?;
                return Ok(None);
            }
            KeyEvent::Metric(metric) => metric,
        };

        let definition = match self.definitions.get(id.name()) {
            Some(definition) => definition,
            None => {
                debug!("{}: definition not available, removing state", id);
                store.remove(id)?;
                return Ok(None);
            }
        };

        let mut stores = match store.get(id) {
            Ok(stores) => stores.unwrap_or_default(),
            Err(e) => {
                warn!("{}: discarding unreadable state: {}", id, e);
                VariableStores::new()
            }
        };

        let group_by: BTreeSet<String> = id.group_by().keys().cloned().collect();
        let updated = definition.update_store(&mut stores, metric, &group_by);
        let derived = definition.generate_by_update(&stores, metric, id.group_by(), &updated);

        store.put(id, &stores)?;

        Ok(derived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exceptions::ExceptionsCache;
    use crate::metric::attributes;
    use crate::properties::Properties;
    use crate::state::MemoryStateStore;
    use crate::value::Value;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    fn definitions(pairs: &[(&str, &str)]) -> Arc<DefinedMetrics> {
        let properties: Properties = pairs.iter().map(|(k, v)| (*k, *v)).collect();
        Arc::new(DefinedMetrics::from_properties(
            &properties,
            Arc::new(ExceptionsCache::default()),
        ))
    }

    fn counter() -> Arc<DefinedMetrics> {
        definitions(&[
            ("metrics.define.count.metrics.groupby", "host"),
            ("metrics.define.count.variables.x.aggregate", "count"),
        ])
    }

    fn store() -> MemoryStateStore<DefinedMetricId, VariableStores> {
        MemoryStateStore::new()
    }

    fn id(host: &str) -> DefinedMetricId {
        DefinedMetricId::new("count", BTreeMap::from([("host".to_string(), host.to_string())]))
    }

    fn metric(seconds: i64, host: &str, series: &str) -> Metric {
        Metric::new(
            at(seconds),
            1.0,
            attributes([("host", host), ("series", series)]),
        )
    }

    #[test]
    fn test_first_metric_starts_empty_store() {
        let updater = DefinedMetricUpdater::new(counter());
        let mut store = store();

        let derived = updater
            .update(&id("a"), KeyEvent::Metric(&metric(0, "a", "s1")), &mut store)
            .unwrap()
            .unwrap();
        assert_eq!(derived.value(), &Value::Numeric(1.0));
        assert!(store.contains(&id("a")));
    }

    #[test]
    fn test_timeout_removes_store() {
        let updater = DefinedMetricUpdater::new(counter());
        let mut store = store();

        updater
            .update(&id("a"), KeyEvent::Metric(&metric(0, "a", "s1")), &mut store)
            .unwrap();
        updater
            .update(&id("a"), KeyEvent::Metric(&metric(1, "a", "s2")), &mut store)
            .unwrap();

        assert_eq!(
            updater.update(&id("a"), KeyEvent::Timeout, &mut store).unwrap(),
            None
        );
        assert!(store.is_empty());

        let derived = updater
            .update(&id("a"), KeyEvent::Metric(&metric(2, "a", "s3")), &mut store)
            .unwrap()
            .unwrap();
        assert_eq!(derived.value(), &Value::Numeric(1.0));
    }

    #[test]
    fn test_unknown_definition_evicts() {
        let updater = DefinedMetricUpdater::new(counter());
        let mut store = store();
        let ghost = DefinedMetricId::new("ghost", BTreeMap::new());

        store.put(&ghost, &VariableStores::new()).unwrap();
        let result = updater
            .update(&ghost, KeyEvent::Metric(&metric(0, "a", "s1")), &mut store)
            .unwrap();
        assert_eq!(result, None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_keys_are_isolated() {
        let updater = DefinedMetricUpdater::new(counter());
        let mut store = store();

        for series in ["s1", "s2", "s3"] {
            updater
                .update(&id("a"), KeyEvent::Metric(&metric(0, "a", series)), &mut store)
                .unwrap();
        }
        let derived = updater
            .update(&id("b"), KeyEvent::Metric(&metric(0, "b", "s1")), &mut store)
            .unwrap()
            .unwrap();
        assert_eq!(derived.value(), &Value::Numeric(1.0));
        assert_eq!(derived.attribute("host"), Some("b"));
    }

    #[test]
    fn test_unreadable_state_replaced() {
        let updater = DefinedMetricUpdater::new(counter());
        let mut store = store();
        store.put_bytes(id("a"), b"{ broken".to_vec());

        let derived = updater
            .update(&id("a"), KeyEvent::Metric(&metric(0, "a", "s1")), &mut store)
            .unwrap()
            .unwrap();
        assert_eq!(derived.value(), &Value::Numeric(1.0));
        assert!(store.get(&id("a")).unwrap().is_some());
    }
}
