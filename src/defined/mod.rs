// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Defined metrics.
//!
//! A defined metric computes new metrics from existing ones. Its variables
//! pick metrics with filters and keep state per group; an equation over
//! the variables produces the derived value every time a metric updates
//! the group.
//!
//! ```text
//! metrics.define.cluster-load.metrics.groupby = cluster
//! metrics.define.cluster-load.variables.load.filter.attribute.$value = load
//! metrics.define.cluster-load.variables.load.aggregate = avg
//! metrics.define.cluster-load.variables.cores.filter.attribute.$value = cores
//! metrics.define.cluster-load.variables.cores.aggregate = sum
//! metrics.define.cluster-load.value = load / cores
//! ```

pub mod cache;
pub mod pipeline;
pub mod update;
pub mod variable;

pub use cache::DefinedMetrics;
pub use pipeline::{DefaultStateStore, DefinedMetricsPipeline};
pub use update::{DefinedMetricUpdater, KeyEvent};
pub use variable::{Aggregation, MetricVariable, Sample, VariableState, VariableStores};

use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::component::{Component, HasStatus};
use crate::equation::{Equation, Node, VariableSource};
use crate::error::ConfigurationError;
use crate::filter::AttributeFilter;
use crate::metric::{Attributes, Metric, DEFINED_METRIC_ATTRIBUTE, SCHEMA_ATTRIBUTE};
use crate::properties::Properties;
use crate::state::{JsonStatusSerializer, StatusSerializer};
use crate::value::{Value, ValueType};

pub const VALUE_PARAM: &str = "value";
pub const WHEN_PARAM: &str = "when";
pub const GROUP_BY_PARAM: &str = "metrics.groupby";
pub const METRICS_FILTER_PARAM: &str = "metrics.filter";
pub const VARIABLES_PARAM: &str = "variables";

/// Prefix of all defined metrics in the global properties.
pub const DEFINED_METRICS_PREFIX: &str = "metrics.define";

/// Identity of one state instance: a definition and a group key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DefinedMetricId {
    name: String,
    group_by: BTreeMap<String, String>,
}

impl DefinedMetricId {
    pub fn new(name: impl Into<String>, group_by: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            group_by,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group_by(&self) -> &BTreeMap<String, String> {
        &self.group_by
    }
}

impl fmt::Display for DefinedMetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.name)?;
        for (i, (key, value)) in self.group_by.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        f.write_str("}")
    }
}

/// Attributes that split a definition into independent groups.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GroupBy {
    /// One group for every metric.
    #[default]
    None,
    /// Every attribute of the metric.
    All,
    Attributes(BTreeSet<String>),
}

impl GroupBy {
    fn parse(raw: &str) -> Self {
        let names: BTreeSet<String> = raw.split_whitespace().map(String::from).collect();
        if names.is_empty() {
            GroupBy::None
        } else if names.len() == 1 && names.contains("ALL") {
            GroupBy::All
        } else {
            GroupBy::Attributes(names)
        }
    }

    /// Group key of `metric`, or `None` when an attribute is missing.
    pub fn key_for(&self, metric: &Metric) -> Option<BTreeMap<String, String>> {
        match self {
            GroupBy::None => Some(BTreeMap::new()),
            GroupBy::All => Some(metric.attributes().clone()),
            GroupBy::Attributes(names) => names
                .iter()
                .map(|name| {
                    metric
                        .attribute(name)
                        .map(|value| (name.clone(), value.to_string()))
                })
                .collect(),
        }
    }
}

/// Variables whose update triggers an evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum When {
    /// Any variable.
    #[default]
    Any,
    Variables(BTreeSet<String>),
}

/// Reads variable values out of the stores at a point in time.
struct StoresSource<'a> {
    definition: &'a DefinedMetric,
    stores: &'a VariableStores,
    time: DateTime<Utc>,
}

impl VariableSource for StoresSource<'_> {
    fn value_of(&self, name: &str) -> Value {
        match self.definition.variables.get(name) {
            Some(variable) => variable.value_at(self.stores, self.time),
            None => Value::Absent,
        }
    }
}

/// One configured defined metric.
///
/// A definition that failed to configure is still a value: it keeps its
/// error, accepts no metric and reports the error on request.
#[derive(Debug, Clone)]
pub struct DefinedMetric {
    name: String,
    equation: Option<Equation>,
    variables: BTreeMap<String, MetricVariable>,
    when: When,
    group_by: GroupBy,
    filter: AttributeFilter,
    configuration_error: Option<ConfigurationError>,
}

impl DefinedMetric {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            equation: None,
            variables: BTreeMap::new(),
            when: When::Any,
            group_by: GroupBy::None,
            filter: AttributeFilter::new(),
            configuration_error: None,
        }
    }

    /// Build and configure in one step. A configuration error is kept in
    /// the definition.
    pub fn build(name: impl Into<String>, properties: Properties, default_max_series: usize) -> Self {
        let mut definition = Self::new(name);
        let _ = definition.configure_with(properties, default_max_series);
        definition
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn equation(&self) -> Option<&Equation> {
        self.equation.as_ref()
    }

    pub fn variable(&self, name: &str) -> Option<&MetricVariable> {
        self.variables.get(name)
    }

    pub fn group_by(&self) -> &GroupBy {
        &self.group_by
    }

    pub fn configuration_error(&self) -> Option<&ConfigurationError> {
        self.configuration_error.as_ref()
    }

    pub fn is_valid(&self) -> bool {
        self.configuration_error.is_none() && self.equation.is_some()
    }

    /// Configure with a default series bound for aggregating variables.
    pub fn configure_with(
        &mut self,
        properties: Properties,
        default_max_series: usize,
    ) -> Result<(), ConfigurationError> {
        self.configuration_error = None;
        self.equation = None;

        match self.try_configure(properties, default_max_series) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("{}: {}", self.name, e);
                self.configuration_error = Some(e.clone());
                Err(e)
            }
        }
    }

    fn try_configure(
        &mut self,
        mut properties: Properties,
        default_max_series: usize,
    ) -> Result<(), ConfigurationError> {
        let mut errors = Vec::new();

        self.group_by = properties
            .take(GROUP_BY_PARAM)
            .map(|raw| GroupBy::parse(&raw))
            .unwrap_or_default();

        match AttributeFilter::from_properties(properties.take_subset(METRICS_FILTER_PARAM)) {
            Ok(filter) => self.filter = filter,
            Err(e) => errors.push(e.within(METRICS_FILTER_PARAM)),
        }

        let variables_props = properties.take_subset(VARIABLES_PARAM);
        let mut variables = BTreeMap::new();
        for name in variables_props.ids() {
            match MetricVariable::from_properties(
                &name,
                variables_props.subset(&name),
                default_max_series,
            ) {
                Ok(variable) => {
                    variables.insert(name, variable);
                }
                Err(e) => errors.push(e.within(&format!("{}.{}", VARIABLES_PARAM, name))),
            }
        }
        let declared = variables_props.ids();
        if declared.is_empty() {
            errors.push(ConfigurationError::missing(VARIABLES_PARAM));
        }

        self.when = match properties.take(WHEN_PARAM) {
            None => When::Any,
            Some(raw) if raw.trim().eq_ignore_ascii_case("ANY") => When::Any,
            Some(raw) => {
                let names: BTreeSet<String> = raw.split_whitespace().map(String::from).collect();
                let unknown: Vec<&str> = names
                    .iter()
                    .filter(|n| !declared.contains(*n))
                    .map(String::as_str)
                    .collect();
                if names.is_empty() || !unknown.is_empty() {
                    errors.push(ConfigurationError::invalid(
                        WHEN_PARAM,
                        raw.as_str(),
                        format!("expected ANY or declared variables, unknown: {}", unknown.join(" ")),
                    ));
                }
                When::Variables(names)
            }
        };

        let types: HashMap<String, ValueType> = variables
            .iter()
            .map(|(name, variable)| (name.clone(), variable.value_type()))
            .collect();
        let equation = match properties.take(VALUE_PARAM) {
            Some(text) => match Equation::parse(&text, &types) {
                Ok(equation) => Some(equation),
                Err(source) => {
                    errors.push(ConfigurationError::Equation {
                        param: VALUE_PARAM.to_string(),
                        source,
                    });
                    None
                }
            },
            None if declared.len() == 1 => variables
                .values()
                .next()
                .map(|v| Equation::new(Node::variable(v.name(), v.value_type()))),
            None if declared.len() > 1 => {
                errors.push(ConfigurationError::missing(VALUE_PARAM));
                None
            }
            None => None,
        };

        if let Err(e) = properties.confirm_all_used() {
            errors.push(e);
        }

        ConfigurationError::collect(errors)?;

        self.variables = variables;
        self.equation = equation;
        Ok(())
    }

    /// Whether `metric` feeds at least one variable.
    pub fn applies_to(&self, metric: &Metric) -> bool {
        self.is_valid()
            && self.filter.test_metric(metric)
            && self.variables.values().any(|v| v.test(metric))
    }

    /// Id of the group `metric` belongs to, if this definition takes it.
    pub fn id_for(&self, metric: &Metric) -> Option<DefinedMetricId> {
        if !self.applies_to(metric) {
            return None;
        }
        self.group_by
            .key_for(metric)
            .map(|group_by| DefinedMetricId::new(self.name.clone(), group_by))
    }

    /// Record `metric` in every variable that takes it. Returns the names of
    /// the updated variables.
    pub fn update_store(
        &self,
        stores: &mut VariableStores,
        metric: &Metric,
        group_by: &BTreeSet<String>,
    ) -> BTreeSet<String> {
        if !self.filter.test_metric(metric) {
            return BTreeSet::new();
        }

        let mut updated = BTreeSet::new();
        for variable in self.variables.values().filter(|v| v.test(metric)) {
            variable.update(stores, metric, group_by);
            updated.insert(variable.name().to_string());
        }
        updated
    }

    /// Evaluate after an update.
    ///
    /// Produces nothing when no triggering variable was updated or when the
    /// equation is absent. The derived metric carries the group key and the
    /// definition's name.
    pub fn generate_by_update(
        &self,
        stores: &VariableStores,
        metric: &Metric,
        group_by: &BTreeMap<String, String>,
        updated: &BTreeSet<String>,
    ) -> Option<Metric> {
        let triggered = match &self.when {
            When::Any => !updated.is_empty(),
            When::Variables(names) => !names.is_disjoint(updated),
        };
        if !triggered {
            return None;
        }

        let time = metric.timestamp();
        let value = self.evaluate(stores, time)?;

        let mut attributes: Attributes = group_by.clone();
        attributes.insert(DEFINED_METRIC_ATTRIBUTE.to_string(), self.name.clone());
        attributes.insert(SCHEMA_ATTRIBUTE.to_string(), self.name.clone());

        Some(Metric::new(time, value, attributes))
    }

    /// Value of the equation at `time`, `None` when absent.
    pub fn evaluate(&self, stores: &VariableStores, time: DateTime<Utc>) -> Option<Value> {
        let equation = self.equation.as_ref()?;
        let source = StoresSource {
            definition: self,
            stores,
            time,
        };
        match equation.evaluate(&source) {
            Value::Absent => None,
            value => Some(value),
        }
    }
}

impl Component for DefinedMetric {
    fn id(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, properties: Properties) -> Result<(), ConfigurationError> {
        self.configure_with(properties, variable::DEFAULT_MAX_SERIES)
    }
}

impl HasStatus for DefinedMetric {
    type Key = DefinedMetricId;
    type Status = VariableStores;

    fn status_serializer(&self) -> Box<dyn StatusSerializer<VariableStores> + Send + Sync> {
        Box::new(JsonStatusSerializer)
    }
}
