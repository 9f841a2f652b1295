// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Variables of a defined metric and their persisted state.
//!
//! A variable selects metrics with its filter and keeps what it needs to
//! produce a value later: the last sample of the group, or the latest
//! sample of each contributing series when it aggregates. Series are the
//! distinct attribute sets left once the group-by attributes are removed
//! (for a group `cluster=a`, each host of the cluster is one series).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigurationError;
use crate::filter::AttributeFilter;
use crate::metric::Metric;
use crate::properties::Properties;
use crate::value::{Value, ValueType};

pub const FILTER_PARAM: &str = "filter";
pub const AGGREGATE_PARAM: &str = "aggregate";
pub const EXPIRE_PARAM: &str = "expire";
pub const TYPE_PARAM: &str = "type";
pub const MAX_SERIES_PARAM: &str = "max-series";

/// Samples older than this are ignored unless configured otherwise.
pub const DEFAULT_EXPIRE_MINUTES: i64 = 10;

/// Bound on contributing series unless configured otherwise.
pub const DEFAULT_MAX_SERIES: usize = 10_000;

/// Aggregation over the latest sample of each series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    /// Most recent sample across all series.
    Last,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Count => "count",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Last => "last",
        }
    }

    /// Type of the aggregated value, `Any` when it follows the samples.
    pub fn return_type(&self) -> ValueType {
        match self {
            Aggregation::Last => ValueType::Any,
            _ => ValueType::Numeric,
        }
    }

    fn apply(&self, variable: &str, samples: &[&Sample]) -> Value {
        if *self == Aggregation::Count {
            return Value::Numeric(samples.len() as f64);
        }
        if samples.is_empty() {
            return Value::Absent;
        }
        if *self == Aggregation::Last {
            return samples
                .iter()
                .max_by_key(|s| s.timestamp)
                .map(|s| s.value.clone())
                .unwrap_or(Value::Absent);
        }

        let mut numbers = Vec::with_capacity(samples.len());
        for sample in samples {
            match &sample.value {
                Value::Numeric(v) => numbers.push(*v),
                contagious @ (Value::Exception(_) | Value::Absent) => return contagious.clone(),
                other => {
                    return Value::exception(format!(
                        "variable {} aggregates with {} but holds {}",
                        variable,
                        self.as_str(),
                        other
                    ))
                }
            }
        }

        let count = numbers.len() as f64;
        let result = match self {
            Aggregation::Avg => numbers.iter().map(|v| v / count).sum(),
            Aggregation::Min => numbers.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregation::Max => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            _ => numbers.iter().sum(),
        };

        if result.is_finite() {
            Value::Numeric(result)
        } else {
            Value::exception(format!(
                "variable {} overflowed computing {}",
                variable,
                self.as_str()
            ))
        }
    }
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(Aggregation::Sum),
            "avg" | "average" => Ok(Aggregation::Avg),
            "count" => Ok(Aggregation::Count),
            "min" => Ok(Aggregation::Min),
            "max" => Ok(Aggregation::Max),
            "last" => Ok(Aggregation::Last),
            other => Err(format!(
                "unknown aggregation {}, expected sum, avg, count, min, max or last",
                other
            )),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: Value,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: Value) -> Self {
        Self { timestamp, value }
    }

    fn is_live(&self, window_start: Option<DateTime<Utc>>) -> bool {
        window_start.map_or(true, |start| self.timestamp >= start)
    }
}

/// Persisted state of one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableState {
    /// Last sample of the group.
    Last(Sample),
    /// Latest sample per series key.
    Series(BTreeMap<String, Sample>),
}

/// State of every variable of one defined metric key.
///
/// Owned by exactly one key; the update step is its only writer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableStores {
    states: BTreeMap<String, VariableState>,
}

impl VariableStores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, variable: &str) -> Option<&VariableState> {
        self.states.get(variable)
    }

    pub fn insert(&mut self, variable: impl Into<String>, state: VariableState) {
        self.states.insert(variable.into(), state);
    }

    pub fn remove(&mut self, variable: &str) -> Option<VariableState> {
        self.states.remove(variable)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VariableState)> {
        self.states.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// One variable of a defined metric.
#[derive(Debug, Clone)]
pub struct MetricVariable {
    name: String,
    filter: AttributeFilter,
    aggregation: Option<Aggregation>,
    expire: Duration,
    value_type: ValueType,
    max_series: usize,
}

impl MetricVariable {
    /// Variable holding the last value of any metric, no filter.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: AttributeFilter::new(),
            aggregation: None,
            expire: Duration::minutes(DEFAULT_EXPIRE_MINUTES),
            value_type: ValueType::Any,
            max_series: DEFAULT_MAX_SERIES,
        }
    }

    pub fn with_filter(mut self, filter: AttributeFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self.value_type = aggregation.return_type();
        self
    }

    pub fn with_expire(mut self, expire: Duration) -> Self {
        self.expire = expire;
        self
    }

    pub fn with_max_series(mut self, max_series: usize) -> Self {
        self.max_series = max_series.max(1);
        self
    }

    /// Build from a `variables.<name>` block.
    pub fn from_properties(
        name: &str,
        mut properties: Properties,
        default_max_series: usize,
    ) -> Result<Self, ConfigurationError> {
        let mut variable = Self::new(name).with_max_series(default_max_series);
        let mut errors = Vec::new();

        match AttributeFilter::from_properties(properties.take_subset(FILTER_PARAM)) {
            Ok(filter) => variable.filter = filter,
            Err(e) => errors.push(e.within(FILTER_PARAM)),
        }

        match properties.take_parsed::<Aggregation>(AGGREGATE_PARAM) {
            Ok(Some(aggregation)) => variable = variable.with_aggregation(aggregation),
            Ok(None) => {}
            Err(e) => errors.push(e),
        }

        match properties.take_duration(EXPIRE_PARAM) {
            Ok(Some(expire)) => variable.expire = expire,
            Ok(None) => {}
            Err(e) => errors.push(e),
        }

        if let Some(raw) = properties.take(TYPE_PARAM) {
            match ValueType::parse(&raw) {
                Some(declared) if declared.accepts(variable.value_type) => {
                    variable.value_type = declared
                }
                Some(declared) => errors.push(ConfigurationError::invalid(
                    TYPE_PARAM,
                    raw,
                    format!(
                        "{} aggregation produces {} values, not {}",
                        variable.aggregation.map(|a| a.as_str()).unwrap_or("last"),
                        variable.value_type,
                        declared
                    ),
                )),
                None => errors.push(ConfigurationError::invalid(
                    TYPE_PARAM,
                    raw,
                    "expected numeric, boolean or any",
                )),
            }
        }

        match properties.take_parsed::<usize>(MAX_SERIES_PARAM) {
            Ok(Some(max_series)) => variable = variable.with_max_series(max_series),
            Ok(None) => {}
            Err(e) => errors.push(e),
        }

        if let Err(e) = properties.confirm_all_used() {
            errors.push(e);
        }

        ConfigurationError::collect(errors)?;
        Ok(variable)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn aggregation(&self) -> Option<Aggregation> {
        self.aggregation
    }

    pub fn expire(&self) -> Duration {
        self.expire
    }

    /// Whether this variable takes `metric`.
    pub fn test(&self, metric: &Metric) -> bool {
        self.filter.test_metric(metric)
    }

    /// Record `metric` in `stores`. The caller checks [`test`](Self::test).
    pub fn update(&self, stores: &mut VariableStores, metric: &Metric, group_by: &BTreeSet<String>) {
        let sample = Sample::new(metric.timestamp(), metric.value().clone());

        if self.aggregation.is_none() {
            stores.insert(self.name.clone(), VariableState::Last(sample));
            return;
        }

        let mut series = match stores.remove(&self.name) {
            Some(VariableState::Series(series)) => series,
            _ => BTreeMap::new(),
        };

        series.insert(series_key(metric, group_by), sample);

        let window_start = self.window_start(metric.timestamp());
        series.retain(|_, s| s.is_live(window_start));

        while series.len() > self.max_series {
            let oldest = series
                .iter()
                .min_by_key(|(_, s)| s.timestamp)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    series.remove(&key);
                }
                None => break,
            }
        }

        stores.insert(self.name.clone(), VariableState::Series(series));
    }

    /// Oldest timestamp still counted at `time`; `None` when `time - expire`
    /// falls before the representable range, so nothing expires.
    fn window_start(&self, time: DateTime<Utc>) -> Option<DateTime<Utc>> {
        time.checked_sub_signed(self.expire)
    }

    /// Value of the variable at `time`. Samples older than `time - expire`
    /// do not count.
    pub fn value_at(&self, stores: &VariableStores, time: DateTime<Utc>) -> Value {
        let window_start = self.window_start(time);

        match (stores.get(&self.name), self.aggregation) {
            (Some(VariableState::Last(sample)), _) if sample.is_live(window_start) => {
                sample.value.clone()
            }
            (Some(VariableState::Series(series)), Some(aggregation)) => {
                let live: Vec<&Sample> = series
                    .values()
                    .filter(|s| s.is_live(window_start))
                    .collect();
                aggregation.apply(&self.name, &live)
            }
            (None, Some(Aggregation::Count)) => Value::Numeric(0.0),
            _ => Value::Absent,
        }
    }
}

/// Key of the series `metric` belongs to: its attributes without the
/// group-by ones.
fn series_key(metric: &Metric, group_by: &BTreeSet<String>) -> String {
    metric
        .attributes()
        .iter()
        .filter(|(k, _)| !group_by.contains(*k))
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}
