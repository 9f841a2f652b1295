// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Value model shared by metrics and equations.
//!
//! A [`Value`] is either a number, a boolean, an exception or absent.
//! Exceptions are ordinary data: a failed extraction or evaluation produces
//! an `Exception` value that flows downstream like any other value.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tagged value carried by metrics and produced by equations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Floating point number.
    Numeric(f64),
    /// Boolean flag.
    Boolean(bool),
    /// Failure surfaced as data, with its message.
    Exception(String),
    /// No value available.
    Absent,
}

impl Value {
    /// Create an exception value.
    pub fn exception(message: impl Into<String>) -> Self {
        Value::Exception(message.into())
    }

    /// Runtime type of this value.
    ///
    /// Returns `None` for exceptions and absent values, which carry no type.
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Numeric(_) => Some(ValueType::Numeric),
            Value::Boolean(_) => Some(ValueType::Boolean),
            Value::Exception(_) | Value::Absent => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_exception(&self) -> Option<&str> {
        match self {
            Value::Exception(message) => Some(message),
            _ => None,
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, Value::Exception(_))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// True for exceptions and absent values.
    ///
    /// Such values are contagious: any function receiving one returns it.
    pub fn is_contagious(&self) -> bool {
        matches!(self, Value::Exception(_) | Value::Absent)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Numeric(v)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Numeric(v) => write!(f, "{}", v),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Exception(message) => write!(f, "exception({})", message),
            Value::Absent => write!(f, "absent"),
        }
    }
}

/// Static type of an equation node or a function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Numeric,
    Boolean,
    /// Unknown until evaluation (e.g. a variable with no declared type).
    Any,
}

impl ValueType {
    /// Whether a node returning `actual` may feed a parameter of this type.
    ///
    /// `Any` on either side defers the check to evaluation time.
    pub fn accepts(self, actual: ValueType) -> bool {
        self == ValueType::Any || actual == ValueType::Any || self == actual
    }

    /// Whether a runtime value satisfies this type.
    pub fn matches(self, value: &Value) -> bool {
        match value.value_type() {
            Some(actual) => self == ValueType::Any || self == actual,
            None => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Numeric => "numeric",
            ValueType::Boolean => "boolean",
            ValueType::Any => "any",
        }
    }

    /// Parse a configured type name.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "numeric" | "float" | "number" => Some(ValueType::Numeric),
            "boolean" | "bool" => Some(ValueType::Boolean),
            "any" => Some(ValueType::Any),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
