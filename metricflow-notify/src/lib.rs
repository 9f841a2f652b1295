// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # MetricFlow Notify
//!
//! Delivery boundary for notifications raised on derived metrics.
//!
//! A sink receives a batch of [`Notification`]s and owns its transport and
//! its configuration. Sinks are chosen by a `type` tag and built through a
//! [`SinkRegistry`]:
//!
//! ```rust
//! use metricflow::Properties;
//! use metricflow_notify::{Notification, SinkRegistry};
//!
//! let registry = SinkRegistry::default();
//! let properties: Properties = [("type", "log"), ("level", "warn")].into_iter().collect();
//! let mut sink = registry.build("ops-log", properties).unwrap();
//!
//! let notification = Notification::new("cpu-monitor", "high", "cpu above 90%");
//! sink.notify(&mut std::iter::once(notification)).unwrap();
//! ```

use chrono::{DateTime, Utc};
use log::{log, Level};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use thiserror::Error;

use metricflow::component::{Component, ComponentRegistry};
use metricflow::{Attributes, ConfigurationError, Metric, Properties};

/// Errors raised while delivering notifications.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Notification could not be encoded
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport rejected the batch
    #[error("sink {sink}: delivery failed: {reason}")]
    Delivery { sink: String, reason: String },
}

/// An event raised by a monitor on a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// When the condition was detected.
    pub timestamp: DateTime<Utc>,
    /// Monitor that raised it.
    pub monitor_id: String,
    /// Notificator (rule) of the monitor that raised it.
    pub notificator_id: String,
    /// Attributes of the metric that triggered it.
    pub metric_attributes: Attributes,
    /// Human-readable reason.
    pub reason: String,
    /// Sinks this notification is addressed to; empty means all.
    pub sink_ids: BTreeSet<String>,
    /// Free-form tags.
    pub tags: BTreeMap<String, String>,
}

impl Notification {
    /// Notification raised now.
    pub fn new(
        monitor_id: impl Into<String>,
        notificator_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            monitor_id: monitor_id.into(),
            notificator_id: notificator_id.into(),
            metric_attributes: Attributes::new(),
            reason: reason.into(),
            sink_ids: BTreeSet::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Notification about `metric`, at the metric's timestamp.
    pub fn for_metric(
        metric: &Metric,
        monitor_id: impl Into<String>,
        notificator_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: metric.timestamp(),
            metric_attributes: metric.attributes().clone(),
            ..Self::new(monitor_id, notificator_id, reason)
        }
    }

    pub fn with_sink(mut self, sink_id: impl Into<String>) -> Self {
        self.sink_ids.insert(sink_id.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Whether this notification must be delivered to `sink_id`.
    pub fn is_addressed_to(&self, sink_id: &str) -> bool {
        self.sink_ids.is_empty() || self.sink_ids.contains(sink_id)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}:{} {}",
            self.timestamp.to_rfc3339(),
            self.monitor_id,
            self.notificator_id,
            self.reason
        )
    }
}

/// Destination of notifications.
pub trait NotificationsSink: Component + Send + fmt::Debug {
    /// Deliver every notification addressed to this sink.
    fn notify(
        &mut self,
        notifications: &mut dyn Iterator<Item = Notification>,
    ) -> Result<(), SinkError>;
}

/// Writes notifications to the `log` facade.
#[derive(Debug)]
pub struct LogNotificationsSink {
    id: String,
    level: Level,
}

impl LogNotificationsSink {
    pub const LEVEL_PARAM: &'static str = "level";

    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            level: Level::Info,
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }
}

impl Component for LogNotificationsSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn configure(&mut self, mut properties: Properties) -> Result<(), ConfigurationError> {
        self.level = properties
            .take_parsed::<Level>(Self::LEVEL_PARAM)?
            .unwrap_or(Level::Info);
        properties.confirm_all_used()
    }
}

impl NotificationsSink for LogNotificationsSink {
    fn notify(
        &mut self,
        notifications: &mut dyn Iterator<Item = Notification>,
    ) -> Result<(), SinkError> {
        for notification in notifications.filter(|n| n.is_addressed_to(&self.id)) {
            log!(self.level, "{}: {}", self.id, notification.to_json()?);
        }
        Ok(())
    }
}

/// What a full [`MemoryNotificationsSink`] does with a new notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overflow {
    /// Drop the oldest stored notification.
    #[default]
    Evict,
    /// Refuse the notification and fail the batch.
    Reject,
}

impl std::str::FromStr for Overflow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "evict" => Ok(Overflow::Evict),
            "reject" => Ok(Overflow::Reject),
            other => Err(format!("unknown overflow {}, expected evict or reject", other)),
        }
    }
}

/// Keeps the most recent notifications in memory.
#[derive(Debug)]
pub struct MemoryNotificationsSink {
    id: String,
    capacity: usize,
    overflow: Overflow,
    notifications: VecDeque<Notification>,
}

impl MemoryNotificationsSink {
    pub const CAPACITY_PARAM: &'static str = "capacity";
    pub const OVERFLOW_PARAM: &'static str = "overflow";
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capacity: Self::DEFAULT_CAPACITY,
            overflow: Overflow::Evict,
            notifications: VecDeque::new(),
        }
    }

    /// Bound the buffer. A capacity of zero is raised to one.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_overflow(mut self, overflow: Overflow) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn overflow(&self) -> Overflow {
        self.overflow
    }

    /// Stored notifications, oldest first.
    pub fn notifications(&self) -> impl Iterator<Item = &Notification> {
        self.notifications.iter()
    }

    /// Remove and return every stored notification.
    pub fn drain(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }
}

impl Component for MemoryNotificationsSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn configure(&mut self, mut properties: Properties) -> Result<(), ConfigurationError> {
        let capacity = properties
            .take_parsed::<usize>(Self::CAPACITY_PARAM)?
            .unwrap_or(Self::DEFAULT_CAPACITY);
        if capacity == 0 {
            return Err(ConfigurationError::invalid(
                Self::CAPACITY_PARAM,
                "0",
                "must be greater than zero",
            ));
        }
        self.capacity = capacity;
        self.overflow = properties
            .take_parsed::<Overflow>(Self::OVERFLOW_PARAM)?
            .unwrap_or_default();
        properties.confirm_all_used()
    }
}

impl NotificationsSink for MemoryNotificationsSink {
    fn notify(
        &mut self,
        notifications: &mut dyn Iterator<Item = Notification>,
    ) -> Result<(), SinkError> {
        for notification in notifications.filter(|n| n.is_addressed_to(&self.id)) {
            if self.notifications.len() >= self.capacity {
                match self.overflow {
                    Overflow::Evict => {
                        self.notifications.pop_front();
                    }
                    Overflow::Reject => {
                        return Err(SinkError::Delivery {
                            sink: self.id.clone(),
                            reason: format!("buffer full ({} notifications)", self.capacity),
                        })
                    }
                }
            }
            self.notifications.push_back(notification);
        }
        Ok(())
    }
}

/// Registry of sink types.
#[derive(Debug)]
pub struct SinkRegistry {
    registry: ComponentRegistry<dyn NotificationsSink>,
}

impl SinkRegistry {
    /// Registry without any sink type.
    pub fn empty() -> Self {
        Self {
            registry: ComponentRegistry::new(),
        }
    }

    /// Register a sink type under `tag`.
    pub fn register<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Box<dyn NotificationsSink> + Send + Sync + 'static,
    {
        self.registry.register(tag, factory);
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.registry.contains(tag)
    }

    /// Build and configure sink `id` from its properties.
    pub fn build(
        &self,
        id: &str,
        properties: Properties,
    ) -> Result<Box<dyn NotificationsSink>, ConfigurationError> {
        self.registry.build(id, properties)
    }
}

impl Default for SinkRegistry {
    /// Registry with the `log` and `memory` sinks.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("log", |id| Box::new(LogNotificationsSink::new(id)));
        registry.register("memory", |id| Box::new(MemoryNotificationsSink::new(id)));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use metricflow::metric::attributes;

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn test_notification_for_metric() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let metric = Metric::new(ts, 0.95, attributes([("host", "h1")]));

        let notification = Notification::for_metric(&metric, "cpu", "high", "cpu above 90%")
            .with_tag("team", "ops");
        assert_eq!(notification.timestamp, ts);
        assert_eq!(notification.metric_attributes.get("host").map(String::as_str), Some("h1"));
        assert_eq!(notification.tags.get("team").map(String::as_str), Some("ops"));
        assert!(notification.to_string().contains("cpu:high cpu above 90%"));
    }

    #[test]
    fn test_notification_serialization() {
        let notification = Notification::new("m", "n", "reason").with_sink("mail");
        let json = notification.to_json().unwrap();
        let parsed = Notification::from_json(&json).unwrap();
        assert_eq!(notification, parsed);
    }

    #[test]
    fn test_addressing() {
        let open = Notification::new("m", "n", "r");
        assert!(open.is_addressed_to("anything"));

        let targeted = open.with_sink("a");
        assert!(targeted.is_addressed_to("a"));
        assert!(!targeted.is_addressed_to("b"));
    }

    #[test]
    fn test_memory_sink_capacity() {
        let mut sink = MemoryNotificationsSink::new("mem").with_capacity(2);
        let mut batch = (0..3).map(|i| Notification::new("m", "n", format!("r{}", i)));
        sink.notify(&mut batch).unwrap();

        let reasons: Vec<&str> = sink.notifications().map(|n| n.reason.as_str()).collect();
        assert_eq!(reasons, vec!["r1", "r2"]);
        assert_eq!(sink.drain().len(), 2);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_memory_sink_zero_capacity_stays_bounded() {
        let mut sink = MemoryNotificationsSink::new("mem").with_capacity(0);
        assert_eq!(sink.capacity(), 1);

        let mut batch = (0..5).map(|i| Notification::new("m", "n", format!("r{}", i)));
        sink.notify(&mut batch).unwrap();

        let reasons: Vec<&str> = sink.notifications().map(|n| n.reason.as_str()).collect();
        assert_eq!(reasons, vec!["r4"]);
    }

    #[test]
    fn test_memory_sink_rejects_when_full() {
        let mut sink = MemoryNotificationsSink::new("mem")
            .with_capacity(2)
            .with_overflow(Overflow::Reject);
        let mut batch = (0..3).map(|i| Notification::new("m", "n", format!("r{}", i)));

        match sink.notify(&mut batch) {
            Err(SinkError::Delivery { sink: id, reason }) => {
                assert_eq!(id, "mem");
                assert!(reason.contains("full"));
            }
            other => panic!("expected delivery failure, got {:?}", other),
        }

        let reasons: Vec<&str> = sink.notifications().map(|n| n.reason.as_str()).collect();
        assert_eq!(reasons, vec!["r0", "r1"]);
    }

    #[test]
    fn test_memory_sink_skips_other_sinks() {
        let mut sink = MemoryNotificationsSink::new("mem");
        let batch = vec![
            Notification::new("m", "n", "mine").with_sink("mem"),
            Notification::new("m", "n", "theirs").with_sink("mail"),
        ];
        sink.notify(&mut batch.into_iter()).unwrap();
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_registry_builds_known_types() {
        let registry = SinkRegistry::default();

        let sink = registry
            .build("ops", props(&[("type", "log"), ("level", "debug")]))
            .unwrap();
        assert_eq!(sink.id(), "ops");

        let mut sink = registry
            .build(
                "buffer",
                props(&[("type", "memory"), ("capacity", "10"), ("overflow", "reject")]),
            )
            .unwrap();
        sink.notify(&mut std::iter::once(Notification::new("m", "n", "r")))
            .unwrap();
    }

    #[test]
    fn test_registry_rejects_bad_configuration() {
        let registry = SinkRegistry::default();

        let err = registry
            .build("x", props(&[("type", "http")]))
            .unwrap_err();
        assert_eq!(err.params(), vec!["type"]);
        assert!(err.to_string().contains("log, memory"));

        let err = registry
            .build("x", props(&[("type", "memory"), ("capacity", "0")]))
            .unwrap_err();
        assert_eq!(err.params(), vec!["capacity"]);

        let err = registry
            .build("x", props(&[("type", "memory"), ("overflow", "block")]))
            .unwrap_err();
        assert_eq!(err.params(), vec!["overflow"]);

        let err = registry
            .build("x", props(&[("type", "log"), ("level", "loud")]))
            .unwrap_err();
        assert_eq!(err.params(), vec!["level"]);

        let err = registry
            .build("x", props(&[("type", "log"), ("url", "http://localhost")]))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::Unused(_)));

        assert!(SinkRegistry::empty().build("x", props(&[("type", "log")])).is_err());
    }
}
