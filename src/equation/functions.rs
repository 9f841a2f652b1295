// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Function catalogue.
//!
//! Every function has a fixed signature checked when the equation is
//! built. At evaluation, the first exception or absent argument is
//! returned unchanged; otherwise the function computes on its operands.
//! Functions never read anything but their arguments.

use crate::value::{Value, ValueType};

use ValueType::{Any, Boolean, Numeric};

/// Built-in equation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Add,
    Sub,
    Mul,
    /// Division. A zero divisor yields `Exception("division by zero")`.
    Div,
    Neg,
    Abs,
    /// Square root. A negative operand yields an exception.
    Sqrt,
    /// Power. A non-finite result yields an exception.
    Pow,
    Min,
    Max,
    Gt,
    Ge,
    Lt,
    Le,
    /// Equality of two numbers or two booleans.
    Eq,
    Ne,
    And,
    Or,
    Not,
}

impl Function {
    /// Symbol or name used in equation text.
    pub fn name(self) -> &'static str {
        match self {
            Function::Add => "+",
            Function::Sub => "-",
            Function::Mul => "*",
            Function::Div => "/",
            Function::Neg => "-",
            Function::Abs => "abs",
            Function::Sqrt => "sqrt",
            Function::Pow => "pow",
            Function::Min => "min",
            Function::Max => "max",
            Function::Gt => ">",
            Function::Ge => ">=",
            Function::Lt => "<",
            Function::Le => "<=",
            Function::Eq => "==",
            Function::Ne => "!=",
            Function::And => "&&",
            Function::Or => "||",
            Function::Not => "!",
        }
    }

    /// Functions callable by name, as `name(args...)`.
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "abs" => Some(Function::Abs),
            "sqrt" => Some(Function::Sqrt),
            "pow" => Some(Function::Pow),
            "min" => Some(Function::Min),
            "max" => Some(Function::Max),
            _ => None,
        }
    }

    pub fn argument_types(self) -> &'static [ValueType] {
        match self {
            Function::Add
            | Function::Sub
            | Function::Mul
            | Function::Div
            | Function::Pow
            | Function::Min
            | Function::Max
            | Function::Gt
            | Function::Ge
            | Function::Lt
            | Function::Le => &[Numeric, Numeric],
            Function::Neg | Function::Abs | Function::Sqrt => &[Numeric],
            Function::Eq | Function::Ne => &[Any, Any],
            Function::And | Function::Or => &[Boolean, Boolean],
            Function::Not => &[Boolean],
        }
    }

    pub fn return_type(self) -> ValueType {
        match self {
            Function::Add
            | Function::Sub
            | Function::Mul
            | Function::Div
            | Function::Neg
            | Function::Abs
            | Function::Sqrt
            | Function::Pow
            | Function::Min
            | Function::Max => Numeric,
            Function::Gt
            | Function::Ge
            | Function::Lt
            | Function::Le
            | Function::Eq
            | Function::Ne
            | Function::And
            | Function::Or
            | Function::Not => Boolean,
        }
    }

    pub fn arity(self) -> usize {
        self.argument_types().len()
    }

    /// Printed between its operands rather than as a call.
    pub fn is_operator(self) -> bool {
        !matches!(
            self,
            Function::Abs | Function::Sqrt | Function::Pow | Function::Min | Function::Max
        )
    }

    /// Apply the function to evaluated arguments.
    pub fn compute(self, args: &[Value]) -> Value {
        if args.len() != self.arity() {
            return Value::exception(format!(
                "function {} expects {} arguments, got {}",
                self.name(),
                self.arity(),
                args.len()
            ));
        }

        // Exceptions and absence are contagious
        if let Some(contagious) = args.iter().find(|v| v.is_contagious()) {
            return contagious.clone();
        }

        // Runtime check for arguments whose static type was Any
        for (position, (expected, arg)) in self.argument_types().iter().zip(args).enumerate() {
            if !expected.matches(arg) {
                return Value::exception(format!(
                    "function {} expects {} argument at position {}, got {}",
                    self.name(),
                    expected,
                    position,
                    arg
                ));
            }
        }

        match self {
            Function::Eq | Function::Ne => compare_equal(self, &args[0], &args[1]),
            Function::And => Value::Boolean(bool_at(args, 0) && bool_at(args, 1)),
            Function::Or => Value::Boolean(bool_at(args, 0) || bool_at(args, 1)),
            Function::Not => Value::Boolean(!bool_at(args, 0)),
            _ => self.compute_numeric(args),
        }
    }

    fn compute_numeric(self, args: &[Value]) -> Value {
        let a = num_at(args, 0);
        let b = if args.len() > 1 { num_at(args, 1) } else { 0.0 };

        let result = match self {
            Function::Add => a + b,
            Function::Sub => a - b,
            Function::Mul => a * b,
            Function::Div => {
                if b == 0.0 {
                    return Value::exception("division by zero");
                }
                a / b
            }
            Function::Neg => -a,
            Function::Abs => a.abs(),
            Function::Sqrt => {
                if a < 0.0 {
                    return Value::exception(format!("square root of negative number {}", a));
                }
                a.sqrt()
            }
            Function::Pow => a.powf(b),
            Function::Min => a.min(b),
            Function::Max => a.max(b),
            Function::Gt => return Value::Boolean(a > b),
            Function::Ge => return Value::Boolean(a >= b),
            Function::Lt => return Value::Boolean(a < b),
            Function::Le => return Value::Boolean(a <= b),
            _ => {
                return Value::exception(format!("function {} is not numeric", self.name()));
            }
        };

        if result.is_finite() {
            Value::Numeric(result)
        } else {
            Value::exception(format!(
                "function {} produced a non-finite result",
                self.name()
            ))
        }
    }
}

fn num_at(args: &[Value], i: usize) -> f64 {
    args[i].as_f64().unwrap_or(f64::NAN)
}

fn bool_at(args: &[Value], i: usize) -> bool {
    args[i].as_bool().unwrap_or(false)
}

fn compare_equal(function: Function, a: &Value, b: &Value) -> Value {
    let equal = match (a, b) {
        (Value::Numeric(x), Value::Numeric(y)) => x == y,
        (Value::Boolean(x), Value::Boolean(y)) => x == y,
        _ => {
            return Value::exception(format!(
                "function {} cannot compare {} with {}",
                function.name(),
                a,
                b
            ));
        }
    };

    match function {
        Function::Ne => Value::Boolean(!equal),
        _ => Value::Boolean(equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn num(v: f64) -> Value {
        Value::Numeric(v)
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(Function::Add.compute(&[num(1.0), num(2.0)]), num(3.0));
        assert_eq!(Function::Sub.compute(&[num(1.0), num(2.0)]), num(-1.0));
        assert_eq!(Function::Mul.compute(&[num(3.0), num(2.0)]), num(6.0));
        assert_eq!(Function::Div.compute(&[num(3.0), num(2.0)]), num(1.5));
        assert_eq!(Function::Neg.compute(&[num(3.0)]), num(-3.0));
        assert_eq!(Function::Abs.compute(&[num(-3.0)]), num(3.0));
        assert_eq!(Function::Min.compute(&[num(3.0), num(2.0)]), num(2.0));
        assert_eq!(Function::Max.compute(&[num(3.0), num(2.0)]), num(3.0));

        let root = Function::Sqrt.compute(&[num(2.0)]).as_f64().unwrap();
        assert_relative_eq!(root, 2f64.sqrt());
    }

    #[test]
    fn test_division_by_zero() {
        let result = Function::Div.compute(&[num(1.0), num(0.0)]);
        assert_eq!(result, Value::exception("division by zero"));
    }

    #[test]
    fn test_sqrt_negative() {
        assert!(Function::Sqrt.compute(&[num(-1.0)]).is_exception());
    }

    #[test]
    fn test_pow_overflow() {
        assert_eq!(Function::Pow.compute(&[num(2.0), num(3.0)]), num(8.0));
        assert!(Function::Pow.compute(&[num(10.0), num(1000.0)]).is_exception());
    }

    #[test]
    fn test_exception_is_contagious() {
        let result = Function::Add.compute(&[Value::exception("upstream"), num(1.0)]);
        assert_eq!(result, Value::exception("upstream"));
    }

    #[test]
    fn test_absent_is_contagious() {
        assert_eq!(Function::Add.compute(&[num(1.0), Value::Absent]), Value::Absent);
        assert_eq!(Function::Not.compute(&[Value::Absent]), Value::Absent);
    }

    #[test]
    fn test_first_contagious_argument_wins() {
        let result = Function::Add.compute(&[Value::Absent, Value::exception("later")]);
        assert_eq!(result, Value::Absent);
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(Function::Gt.compute(&[num(2.0), num(1.0)]), Value::Boolean(true));
        assert_eq!(Function::Ge.compute(&[num(1.0), num(1.0)]), Value::Boolean(true));
        assert_eq!(Function::Lt.compute(&[num(2.0), num(1.0)]), Value::Boolean(false));
        assert_eq!(Function::Le.compute(&[num(2.0), num(1.0)]), Value::Boolean(false));
    }

    #[test]
    fn test_equality() {
        assert_eq!(Function::Eq.compute(&[num(2.0), num(2.0)]), Value::Boolean(true));
        assert_eq!(
            Function::Ne.compute(&[Value::Boolean(true), Value::Boolean(false)]),
            Value::Boolean(true)
        );
        assert!(Function::Eq
            .compute(&[num(1.0), Value::Boolean(true)])
            .is_exception());
    }

    #[test]
    fn test_boolean_functions() {
        let t = Value::Boolean(true);
        let f = Value::Boolean(false);
        assert_eq!(Function::And.compute(&[t.clone(), f.clone()]), f);
        assert_eq!(Function::Or.compute(&[t.clone(), f.clone()]), t);
        assert_eq!(Function::Not.compute(&[f.clone()]), t);
    }

    #[test]
    fn test_runtime_type_mismatch() {
        let result = Function::And.compute(&[num(1.0), Value::Boolean(true)]);
        let message = result.as_exception().unwrap();
        assert!(message.contains("position 0"));
    }

    #[test]
    fn test_signatures() {
        assert_eq!(Function::Not.argument_types(), &[Boolean]);
        assert_eq!(Function::Not.return_type(), Boolean);
        assert_eq!(Function::Add.arity(), 2);
        assert_eq!(Function::by_name("sqrt"), Some(Function::Sqrt));
        assert_eq!(Function::by_name("log"), None);
    }
}
