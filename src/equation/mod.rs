// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Typed equations over metric values.
//!
//! An equation is an immutable tree. Leaves are constants or variables;
//! interior nodes apply a [`Function`]. Argument counts and types are
//! checked when a call node is built, so a tree that exists is well typed
//! (up to `Any`-typed variables, which are checked at evaluation and turn
//! into exception values on mismatch).
//!
//! Variables read their current value from a [`VariableSource`]. Defined
//! metrics implement it on top of their variable stores; tests can use a
//! plain map.
//!
//! ```rust
//! use std::collections::HashMap;
//! use metricflow::equation::Equation;
//! use metricflow::value::{Value, ValueType};
//!
//! let types = HashMap::from([("a".to_string(), ValueType::Numeric)]);
//! let equation = Equation::parse("a * 2 > 5", &types).unwrap();
//!
//! let inputs = HashMap::from([("a".to_string(), Value::Numeric(3.0))]);
//! assert_eq!(equation.evaluate(&inputs), Value::Boolean(true));
//! ```

mod functions;
mod parser;

pub use functions::Function;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::error::EquationError;
use crate::value::{Value, ValueType};

/// Provides the current value of named variables.
pub trait VariableSource {
    /// Value of `name`; `Value::Absent` when it has none.
    fn value_of(&self, name: &str) -> Value;
}

impl VariableSource for HashMap<String, Value> {
    fn value_of(&self, name: &str) -> Value {
        self.get(name).cloned().unwrap_or(Value::Absent)
    }
}

impl VariableSource for BTreeMap<String, Value> {
    fn value_of(&self, name: &str) -> Value {
        self.get(name).cloned().unwrap_or(Value::Absent)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum NodeKind {
    Constant(Value),
    Variable { name: String, value_type: ValueType },
    Call { function: Function, arguments: Vec<Node> },
}

/// Deepest tree a call node may root. Evaluation recurses once per level.
pub const MAX_DEPTH: usize = 64;

/// Node of an equation tree. Its shape cannot change after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    kind: NodeKind,
    depth: usize,
}

impl Node {
    pub fn constant(value: impl Into<Value>) -> Self {
        Self {
            kind: NodeKind::Constant(value.into()),
            depth: 1,
        }
    }

    pub fn variable(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            kind: NodeKind::Variable {
                name: name.into(),
                value_type,
            },
            depth: 1,
        }
    }

    /// Build a call node, checking arity, argument types and depth.
    pub fn call(function: Function, arguments: Vec<Node>) -> Result<Self, EquationError> {
        let expected = function.argument_types();
        if arguments.len() != expected.len() {
            return Err(EquationError::Arity {
                function: function.name(),
                expected: expected.len(),
                actual: arguments.len(),
            });
        }

        for (position, (param, argument)) in expected.iter().zip(&arguments).enumerate() {
            let actual = argument.return_type();
            if !param.accepts(actual) {
                return Err(EquationError::ArgumentType {
                    function: function.name(),
                    position,
                    expected: *param,
                    actual,
                });
            }
        }

        let depth = 1 + arguments.iter().map(Node::depth).max().unwrap_or(0);
        if depth > MAX_DEPTH {
            return Err(EquationError::TooDeep { max: MAX_DEPTH });
        }

        Ok(Self {
            kind: NodeKind::Call {
                function,
                arguments,
            },
            depth,
        })
    }

    /// Levels from this node down to its deepest leaf.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Static return type.
    pub fn return_type(&self) -> ValueType {
        match &self.kind {
            NodeKind::Constant(value) => value.value_type().unwrap_or(ValueType::Any),
            NodeKind::Variable { value_type, .. } => *value_type,
            NodeKind::Call { function, .. } => function.return_type(),
        }
    }

    pub fn evaluate(&self, source: &dyn VariableSource) -> Value {
        match &self.kind {
            NodeKind::Constant(value) => value.clone(),
            NodeKind::Variable { name, value_type } => {
                let value = source.value_of(name);
                if value.is_contagious() || value_type.matches(&value) {
                    value
                } else {
                    Value::exception(format!(
                        "variable {} is declared {} but holds {}",
                        name, value_type, value
                    ))
                }
            }
            NodeKind::Call {
                function,
                arguments,
            } => {
                let values: Vec<Value> = arguments.iter().map(|a| a.evaluate(source)).collect();
                function.compute(&values)
            }
        }
    }

    fn collect_variables<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match &self.kind {
            NodeKind::Constant(_) => {}
            NodeKind::Variable { name, .. } => {
                out.insert(name.as_str());
            }
            NodeKind::Call { arguments, .. } => {
                for argument in arguments {
                    argument.collect_variables(out);
                }
            }
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Constant(value) => write!(f, "{}", value),
            NodeKind::Variable { name, .. } => f.write_str(name),
            NodeKind::Call {
                function,
                arguments,
            } => match (function.is_operator(), arguments.as_slice()) {
                (true, [operand]) => write!(f, "{}{}", function.name(), operand),
                (true, [left, right]) => write!(f, "({} {} {})", left, function.name(), right),
                _ => {
                    write!(f, "{}(", function.name())?;
                    for (i, argument) in arguments.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{}", argument)?;
                    }
                    f.write_str(")")
                }
            },
        }
    }
}

/// A parsed, type-checked equation.
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    root: Node,
}

impl Equation {
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    /// Parse equation text. `variables` declares every variable the text may
    /// reference, with its type.
    pub fn parse(
        text: &str,
        variables: &HashMap<String, ValueType>,
    ) -> Result<Self, EquationError> {
        parser::parse(text, variables).map(Self::new)
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn return_type(&self) -> ValueType {
        self.root.return_type()
    }

    pub fn evaluate(&self, source: &dyn VariableSource) -> Value {
        self.root.evaluate(source)
    }

    /// Names of the variables the equation reads.
    pub fn variables(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.root.collect_variables(&mut out);
        out
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root.fmt(f)
    }
}
