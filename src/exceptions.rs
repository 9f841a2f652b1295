// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Exception rate limiting.
//!
//! A broken schema or definition fails on every record it sees. The
//! [`ExceptionsCache`] lets each (owner, cause) pair through at most once
//! per window; repeated failures inside the window are dropped entirely,
//! neither logged nor emitted.
//!
//! The cache is created once per process and shared (`Arc`) by every
//! component that raises exceptions.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Kind of component raising exceptions.
///
/// Part of the rate-limit key, so that a schema and a defined metric with
/// the same name are limited separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    Schema,
    DefinedMetric,
}

impl Owner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Owner::Schema => "schema",
            Owner::DefinedMetric => "defined_metric",
        }
    }

    /// Rate-limit owner key of component `id`.
    pub fn key(self, id: &str) -> String {
        format!("{}:{}", self.as_str(), id)
    }
}

/// Entries beyond this count trigger a purge of expired ones.
const PURGE_THRESHOLD: usize = 1024;

/// Rate limiter for raised exceptions, keyed by (owner, cause).
#[derive(Debug)]
pub struct ExceptionsCache {
    window: Duration,
    clock: Arc<dyn Clock>,
    raised: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

impl ExceptionsCache {
    /// Create a cache on the system clock.
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, Arc::new(SystemClock))
    }

    pub fn with_clock(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            clock,
            raised: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Current time of the cache's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Record a raise of `cause` by `owner`.
    ///
    /// Returns true when the exception must be surfaced, false when an
    /// identical one was already surfaced within the window. Check and
    /// record happen under one lock.
    pub fn try_raise(&self, owner: &str, cause: &str) -> bool {
        let now = self.clock.now();
        let mut raised = self.raised.lock();

        if raised.len() > PURGE_THRESHOLD {
            let window = self.window;
            raised.retain(|_, at| now - *at < window);
        }

        let key = (owner.to_string(), cause.to_string());
        match raised.get(&key) {
            Some(at) if now - *at < self.window => false,
            _ => {
                raised.insert(key, now);
                true
            }
        }
    }

    /// Whether `cause` was surfaced for `owner` within the window.
    pub fn was_recently_raised(&self, owner: &str, cause: &str) -> bool {
        let now = self.clock.now();
        self.raised
            .lock()
            .get(&(owner.to_string(), cause.to_string()))
            .map(|at| now - *at < self.window)
            .unwrap_or(false)
    }

    /// Forget everything.
    pub fn reset(&self) {
        self.raised.lock().clear();
    }

    /// Number of tracked (owner, cause) pairs.
    pub fn len(&self) -> usize {
        self.raised.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.raised.lock().is_empty()
    }
}

impl Default for ExceptionsCache {
    fn default() -> Self {
        Self::new(Duration::minutes(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn manual() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.timestamp_opt(0, 0).unwrap()))
    }

    #[test]
    fn test_owner_kinds_limited_separately() {
        let cache = ExceptionsCache::with_clock(Duration::minutes(1), manual());

        assert_eq!(Owner::Schema.key("load"), "schema:load");
        assert!(cache.try_raise(&Owner::Schema.key("load"), "boom"));
        assert!(cache.try_raise(&Owner::DefinedMetric.key("load"), "boom"));
        assert!(!cache.try_raise(&Owner::DefinedMetric.key("load"), "boom"));
    }

    #[test]
    fn test_raise_once_per_window() {
        let clock = manual();
        let cache = ExceptionsCache::with_clock(Duration::minutes(1), clock.clone());

        assert!(cache.try_raise("schema", "boom"));
        assert!(!cache.try_raise("schema", "boom"));
        assert!(cache.was_recently_raised("schema", "boom"));

        clock.advance(Duration::seconds(59));
        assert!(!cache.try_raise("schema", "boom"));

        clock.advance(Duration::seconds(1));
        assert!(cache.try_raise("schema", "boom"));
    }

    #[test]
    fn test_distinct_keys() {
        let cache = ExceptionsCache::with_clock(Duration::minutes(1), manual());

        assert!(cache.try_raise("a", "boom"));
        assert!(cache.try_raise("b", "boom"));
        assert!(cache.try_raise("a", "other"));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_reset() {
        let cache = ExceptionsCache::with_clock(Duration::minutes(1), manual());
        assert!(cache.try_raise("a", "boom"));
        cache.reset();
        assert!(cache.is_empty());
        assert!(cache.try_raise("a", "boom"));
    }

    #[test]
    fn test_concurrent_raises_admit_one() {
        let cache = Arc::new(ExceptionsCache::with_clock(Duration::minutes(1), manual()));

        let admitted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let cache = cache.clone();
                    scope.spawn(move || {
                        (0..100)
                            .filter(|_| cache.try_raise("schema", "boom"))
                            .count()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(admitted, 1);
    }

    #[test]
    fn test_purge_keeps_live_entries() {
        let clock = manual();
        let cache = ExceptionsCache::with_clock(Duration::minutes(1), clock.clone());

        for i in 0..=PURGE_THRESHOLD {
            cache.try_raise(&format!("owner-{}", i), "boom");
        }
        clock.advance(Duration::minutes(2));
        assert!(cache.try_raise("fresh", "boom"));
        assert_eq!(cache.len(), 1);
    }
}
