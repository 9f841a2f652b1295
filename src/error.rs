// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for MetricFlow
//!
//! Configuration problems are reported once, when a schema or a defined
//! metric is built, and always name the offending parameter. Runtime
//! extraction failures are not faults: schemas turn them into
//! [`Value::Exception`](crate::value::Value::Exception) metrics.

use thiserror::Error;

use crate::value::ValueType;

/// Result type alias for MetricFlow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for MetricFlow operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Equation error
    #[error("Equation error: {0}")]
    Equation(#[from] EquationError),

    /// Extraction error
    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// State store error
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Malformed JSON input
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error (configuration files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while configuring a component
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// Required parameter is not set
    #[error("{param} must be specified")]
    Missing { param: String },

    /// Parameter is set to an invalid value
    #[error("{param}: invalid value \"{value}\": {reason}")]
    Invalid {
        param: String,
        value: String,
        reason: String,
    },

    /// Equation could not be built
    #[error("{param}: {source}")]
    Equation { param: String, source: EquationError },

    /// Parameters left over after configuration
    #[error("unused parameters: {}", .0.join(", "))]
    Unused(Vec<String>),

    /// Several independent parameters failed
    #[error("{} configuration errors: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<ConfigurationError>),
}

fn join_errors(errors: &[ConfigurationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ConfigurationError {
    /// Shorthand for [`ConfigurationError::Missing`]
    pub fn missing(param: impl Into<String>) -> Self {
        Self::Missing {
            param: param.into(),
        }
    }

    /// Shorthand for [`ConfigurationError::Invalid`]
    pub fn invalid(
        param: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Invalid {
            param: param.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Prefix the parameter names of this error with `prefix.`
    pub fn within(self, prefix: &str) -> Self {
        let scoped = |param: String| format!("{}.{}", prefix, param);
        match self {
            Self::Missing { param } => Self::Missing {
                param: scoped(param),
            },
            Self::Invalid {
                param,
                value,
                reason,
            } => Self::Invalid {
                param: scoped(param),
                value,
                reason,
            },
            Self::Equation { param, source } => Self::Equation {
                param: scoped(param),
                source,
            },
            Self::Unused(params) => Self::Unused(params.into_iter().map(scoped).collect()),
            Self::Multiple(errors) => {
                Self::Multiple(errors.into_iter().map(|e| e.within(prefix)).collect())
            }
        }
    }

    /// Parameter identifiers named by this error
    pub fn params(&self) -> Vec<&str> {
        match self {
            Self::Missing { param } | Self::Invalid { param, .. } | Self::Equation { param, .. } => {
                vec![param.as_str()]
            }
            Self::Unused(params) => params.iter().map(String::as_str).collect(),
            Self::Multiple(errors) => errors.iter().flat_map(|e| e.params()).collect(),
        }
    }

    /// Fold a list of collected errors into a single result.
    ///
    /// Nested `Multiple` lists are flattened.
    pub fn collect(errors: Vec<ConfigurationError>) -> std::result::Result<(), Self> {
        let mut flat = Vec::with_capacity(errors.len());
        for error in errors {
            match error {
                Self::Multiple(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }

        match flat.len() {
            0 => Ok(()),
            1 => Err(flat.remove(0)),
            _ => Err(Self::Multiple(flat)),
        }
    }
}

/// Errors raised while building an equation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EquationError {
    /// Wrong number of arguments
    #[error("function {function} expects {expected} arguments, got {actual}")]
    Arity {
        function: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Argument subtree returns an incompatible type
    #[error("function {function} expects {expected} argument at position {position}, got {actual}")]
    ArgumentType {
        function: &'static str,
        position: usize,
        expected: ValueType,
        actual: ValueType,
    },

    /// Variable is not declared
    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    /// Function is not in the catalogue
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// Malformed equation text
    #[error("syntax error at offset {offset}: {reason}")]
    Syntax { offset: usize, reason: String },

    /// Tree nests deeper than the supported limit
    #[error("equation nests deeper than {max} levels")]
    TooDeep { max: usize },
}

/// Runtime failures while extracting metrics from a record
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    /// Key not present in the record
    #[error("no element found for key {0}")]
    MissingKey(String),

    /// Element is an object or an array
    #[error("element {0} is not a scalar")]
    NotScalar(String),

    /// Element cannot be read as a number
    #[error("element {key} (\"{raw}\") is not a number")]
    InvalidNumber { key: String, raw: String },

    /// Element cannot be read as a boolean
    #[error("element {key} (\"{raw}\") is not a boolean")]
    InvalidBoolean { key: String, raw: String },

    /// Element cannot be read as a timestamp
    #[error("timestamp {key} (\"{raw}\") could not be parsed with format {format}")]
    InvalidTimestamp {
        key: String,
        raw: String,
        format: String,
    },
}

/// Errors at the state persistence boundary
#[derive(Error, Debug)]
pub enum StateError {
    /// State could not be serialized
    #[error("status serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored bytes do not decode to a state
    #[error("corrupted status: {reason}")]
    Corrupted { reason: String },
}
