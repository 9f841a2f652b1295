// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Keyed state boundary.
//!
//! The update step only needs `get`, `put` and `remove` per key, plus a
//! timeout event from whoever hosts it. [`KeyedStateStore`] is that
//! contract; [`MemoryStateStore`] is an in-process implementation that
//! keeps each state as serialized bytes, the way a checkpointing runtime
//! would.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::StateError;
use crate::exceptions::{Clock, SystemClock};

/// Per-key state storage.
pub trait KeyedStateStore<K, S> {
    fn get(&self, key: &K) -> Result<Option<S>, StateError>;

    fn put(&mut self, key: &K, state: &S) -> Result<(), StateError>;

    fn remove(&mut self, key: &K) -> Result<(), StateError>;
}

/// Store able to report keys that have not been written for a while.
pub trait ExpiringStateStore<K, S>: KeyedStateStore<K, S> {
    /// Keys whose last `put` is older than `timeout`.
    fn idle_keys(&self, timeout: Duration) -> Vec<K>;
}

/// Byte encoding of persisted state.
pub trait StatusSerializer<S> {
    fn serialize(&self, state: &S) -> Result<Vec<u8>, StateError>;

    fn deserialize(&self, bytes: &[u8]) -> Result<S, StateError>;
}

/// JSON encoding with serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStatusSerializer;

impl<S: Serialize + DeserializeOwned> StatusSerializer<S> for JsonStatusSerializer {
    fn serialize(&self, state: &S) -> Result<Vec<u8>, StateError> {
        Ok(serde_json::to_vec(state)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<S, StateError> {
        serde_json::from_slice(bytes).map_err(|e| StateError::Corrupted {
            reason: e.to_string(),
        })
    }
}

impl<S, Z> StatusSerializer<S> for Box<Z>
where
    Z: StatusSerializer<S> + ?Sized,
{
    fn serialize(&self, state: &S) -> Result<Vec<u8>, StateError> {
        (**self).serialize(state)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<S, StateError> {
        (**self).deserialize(bytes)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    bytes: Vec<u8>,
    updated: DateTime<Utc>,
}

/// In-memory store of serialized states.
pub struct MemoryStateStore<K, S, Z = JsonStatusSerializer> {
    entries: HashMap<K, Entry>,
    serializer: Z,
    clock: Arc<dyn Clock>,
    _state: PhantomData<fn() -> S>,
}

impl<K, S> MemoryStateStore<K, S, JsonStatusSerializer>
where
    K: Eq + Hash + Clone,
{
    /// JSON-backed store on the system clock.
    pub fn new() -> Self {
        Self::with_serializer(JsonStatusSerializer, Arc::new(SystemClock))
    }
}

impl<K, S> Default for MemoryStateStore<K, S, JsonStatusSerializer>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, S, Z> MemoryStateStore<K, S, Z>
where
    K: Eq + Hash + Clone,
{
    pub fn with_serializer(serializer: Z, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            serializer,
            clock,
            _state: PhantomData,
        }
    }

    /// Same store on another clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Store raw bytes for `key`, as restored from a checkpoint.
    pub fn put_bytes(&mut self, key: K, bytes: Vec<u8>) {
        let updated = self.clock.now();
        self.entries.insert(key, Entry { bytes, updated });
    }

    /// Raw bytes stored for `key`.
    pub fn bytes(&self, key: &K) -> Option<&[u8]> {
        self.entries.get(key).map(|e| e.bytes.as_slice())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<K, S, Z> KeyedStateStore<K, S> for MemoryStateStore<K, S, Z>
where
    K: Eq + Hash + Clone,
    Z: StatusSerializer<S>,
{
    fn get(&self, key: &K) -> Result<Option<S>, StateError> {
        match self.entries.get(key) {
            Some(entry) => self.serializer.deserialize(&entry.bytes).map(Some),
            None => Ok(None),
        }
    }

    fn put(&mut self, key: &K, state: &S) -> Result<(), StateError> {
        let bytes = self.serializer.serialize(state)?;
        self.put_bytes(key.clone(), bytes);
        Ok(())
    }

    fn remove(&mut self, key: &K) -> Result<(), StateError> {
        self.entries.remove(key);
        Ok(())
    }
}

impl<K, S, Z> ExpiringStateStore<K, S> for MemoryStateStore<K, S, Z>
where
    K: Eq + Hash + Clone,
    Z: StatusSerializer<S>,
{
    fn idle_keys(&self, timeout: Duration) -> Vec<K> {
        let now = self.clock.now();
        self.entries
            .iter()
            .filter(|(_, entry)| now - entry.updated > timeout)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl<K, S, Z> fmt::Debug for MemoryStateStore<K, S, Z> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStateStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exceptions::ManualClock;
    use chrono::TimeZone;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        count: u32,
    }

    #[test]
    fn test_put_get_remove() {
        let mut store: MemoryStateStore<String, Counter> = MemoryStateStore::new();
        let key = "a".to_string();

        assert_eq!(store.get(&key).unwrap(), None);
        store.put(&key, &Counter { count: 3 }).unwrap();
        assert_eq!(store.get(&key).unwrap(), Some(Counter { count: 3 }));
        assert_eq!(store.bytes(&key).unwrap(), br#"{"count":3}"#);

        store.remove(&key).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupted_bytes() {
        let mut store: MemoryStateStore<String, Counter> = MemoryStateStore::new();
        store.put_bytes("a".to_string(), b"not json".to_vec());
        match store.get(&"a".to_string()) {
            Err(StateError::Corrupted { reason }) => assert!(reason.contains("expected")),
            other => panic!("expected corrupted status, got {:?}", other),
        }
    }

    #[test]
    fn test_idle_keys() {
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(0, 0).unwrap()));
        let mut store: MemoryStateStore<u32, Counter> =
            MemoryStateStore::new().with_clock(clock.clone());

        store.put(&1, &Counter { count: 1 }).unwrap();
        clock.advance(Duration::seconds(30));
        store.put(&2, &Counter { count: 2 }).unwrap();
        clock.advance(Duration::seconds(31));

        assert_eq!(store.idle_keys(Duration::seconds(60)), vec![1]);

        let mut idle = store.idle_keys(Duration::seconds(10));
        idle.sort();
        assert_eq!(idle, vec![1, 2]);
    }
}
