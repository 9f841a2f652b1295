// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Equation text parser.
//!
//! Precedence, lowest first: `||`, `&&`, `== !=`, `> >= < <=`, `+ -`,
//! `* /`, unary `- !`, `^` (right associative). Named functions are
//! written as calls: `abs(x)`, `pow(x, 2)`.

use std::collections::HashMap;

use super::{Function, Node, MAX_DEPTH};
use crate::error::EquationError;
use crate::value::{Value, ValueType};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

/// Operators, longest first so that `>=` wins over `>`.
const OPERATORS: [&str; 15] = [
    "||", "&&", "==", "!=", ">=", "<=", ">", "<", "+", "-", "*", "/", "^", "!", "=",
];

fn tokenize(text: &str) -> Result<Vec<(usize, Token)>, EquationError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let start = i;
        if c.is_ascii_digit() || (c == '.' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit())
        {
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            // Exponent
            if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                let mut j = i + 1;
                if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                    j += 1;
                }
                if j < bytes.len() && bytes[j].is_ascii_digit() {
                    i = j;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let literal = &text[start..i];
            let number = literal.parse::<f64>().map_err(|_| EquationError::Syntax {
                offset: start,
                reason: format!("invalid number {}", literal),
            })?;
            tokens.push((start, Token::Number(number)));
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push((start, Token::Ident(text[start..i].to_string())));
            continue;
        }

        match c {
            '(' => tokens.push((start, Token::LParen)),
            ')' => tokens.push((start, Token::RParen)),
            ',' => tokens.push((start, Token::Comma)),
            _ => {
                let rest = &text[start..];
                match OPERATORS.iter().find(|op| rest.starts_with(**op)) {
                    // A lone `=` is a common typo for `==`
                    Some(&"=") | None => {
                        return Err(EquationError::Syntax {
                            offset: start,
                            reason: format!("unexpected character '{}'", c),
                        });
                    }
                    Some(&op) => {
                        tokens.push((start, Token::Op(op)));
                        i += op.len();
                        continue;
                    }
                }
            }
        }
        i += 1;
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
    /// Open unary, parenthesis and call levels.
    nesting: usize,
    variables: &'a HashMap<String, ValueType>,
}

/// Parse `text` into a type-checked tree.
pub(super) fn parse(
    text: &str,
    variables: &HashMap<String, ValueType>,
) -> Result<Node, EquationError> {
    let mut parser = Parser {
        tokens: tokenize(text)?,
        pos: 0,
        end: text.len(),
        nesting: 0,
        variables,
    };

    if parser.tokens.is_empty() {
        return Err(EquationError::Syntax {
            offset: 0,
            reason: "empty equation".to_string(),
        });
    }

    let node = parser.parse_or()?;
    if let Some((offset, token)) = parser.tokens.get(parser.pos) {
        return Err(EquationError::Syntax {
            offset: *offset,
            reason: format!("unexpected {:?}", token),
        });
    }
    Ok(node)
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(o, _)| *o)
            .unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Consume the next token if it is one of `ops`.
    fn eat_op(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), EquationError> {
        let offset = self.offset();
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(EquationError::Syntax {
                offset,
                reason: format!("expected {:?}, found {:?}", expected, other),
            }),
        }
    }

    fn binary_level(
        &mut self,
        ops: &[&'static str],
        next: fn(&mut Self) -> Result<Node, EquationError>,
    ) -> Result<Node, EquationError> {
        let mut left = next(self)?;
        while let Some(op) = self.eat_op(ops) {
            let right = next(self)?;
            left = Node::call(binary_function(op), vec![left, right])?;
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Node, EquationError> {
        self.binary_level(&["||"], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Node, EquationError> {
        self.binary_level(&["&&"], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Node, EquationError> {
        self.binary_level(&["==", "!="], Self::parse_comparison)
    }

    fn parse_comparison(&mut self) -> Result<Node, EquationError> {
        self.binary_level(&[">", ">=", "<", "<="], Self::parse_additive)
    }

    fn parse_additive(&mut self) -> Result<Node, EquationError> {
        self.binary_level(&["+", "-"], Self::parse_multiplicative)
    }

    fn parse_multiplicative(&mut self) -> Result<Node, EquationError> {
        self.binary_level(&["*", "/"], Self::parse_unary)
    }

    fn parse_unary(&mut self) -> Result<Node, EquationError> {
        if self.nesting >= MAX_DEPTH {
            return Err(EquationError::TooDeep { max: MAX_DEPTH });
        }
        self.nesting += 1;
        let node = self.parse_unary_operand();
        self.nesting -= 1;
        node
    }

    fn parse_unary_operand(&mut self) -> Result<Node, EquationError> {
        match self.eat_op(&["-", "!"]) {
            Some("-") => {
                let operand = self.parse_unary()?;
                // Fold negative literals
                if let Some(Value::Numeric(v)) = constant_value(&operand) {
                    return Ok(Node::constant(-v));
                }
                Node::call(Function::Neg, vec![operand])
            }
            Some(_) => {
                let operand = self.parse_unary()?;
                Node::call(Function::Not, vec![operand])
            }
            None => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Node, EquationError> {
        let base = self.parse_primary()?;
        if self.eat_op(&["^"]).is_some() {
            let exponent = self.parse_unary()?;
            return Node::call(Function::Pow, vec![base, exponent]);
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Node, EquationError> {
        let offset = self.offset();
        match self.next() {
            Some(Token::Number(v)) => Ok(Node::constant(v)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    return self.parse_call(&name);
                }
                match name.as_str() {
                    "true" => Ok(Node::constant(true)),
                    "false" => Ok(Node::constant(false)),
                    _ => match self.variables.get(&name) {
                        Some(value_type) => Ok(Node::variable(name, *value_type)),
                        None => Err(EquationError::UnknownVariable(name)),
                    },
                }
            }
            other => Err(EquationError::Syntax {
                offset,
                reason: match other {
                    Some(token) => format!("unexpected {:?}", token),
                    None => "unexpected end of equation".to_string(),
                },
            }),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Node, EquationError> {
        let function =
            Function::by_name(name).ok_or_else(|| EquationError::UnknownFunction(name.to_string()))?;

        let mut arguments = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                arguments.push(self.parse_or()?);
                if self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;

        Node::call(function, arguments)
    }
}

fn binary_function(op: &str) -> Function {
    match op {
        "||" => Function::Or,
        "&&" => Function::And,
        "==" => Function::Eq,
        "!=" => Function::Ne,
        ">" => Function::Gt,
        ">=" => Function::Ge,
        "<" => Function::Lt,
        "<=" => Function::Le,
        "+" => Function::Add,
        "-" => Function::Sub,
        "*" => Function::Mul,
        "/" => Function::Div,
        _ => Function::Pow,
    }
}

fn constant_value(node: &Node) -> Option<Value> {
    match &node.kind {
        super::NodeKind::Constant(value) => Some(value.clone()),
        _ => None,
    }
}
