//! Expression tree and its interpreter

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Value of a single fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FactValue {
    fn type_name(&self) -> &'static str {
        match self {
            FactValue::Bool(_) => "bool",
            FactValue::Number(_) => "number",
            FactValue::Text(_) => "text",
        }
    }
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactValue::Bool(b) => write!(f, "{}", b),
            FactValue::Number(n) => write!(f, "{}", n),
            FactValue::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<bool> for FactValue {
    fn from(v: bool) -> Self {
        FactValue::Bool(v)
    }
}

impl From<f64> for FactValue {
    fn from(v: f64) -> Self {
        FactValue::Number(v)
    }
}

impl From<u32> for FactValue {
    fn from(v: u32) -> Self {
        FactValue::Number(f64::from(v))
    }
}

impl From<&str> for FactValue {
    fn from(v: &str) -> Self {
        FactValue::Text(v.to_string())
    }
}

impl From<String> for FactValue {
    fn from(v: String) -> Self {
        FactValue::Text(v)
    }
}

/// Flat fact map a rule is evaluated against
pub type Facts = HashMap<String, FactValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(FactValue),
    Fact(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub(crate) fn eval(&self, facts: &Facts) -> Result<FactValue> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Fact(name) => facts
                .get(name)
                .cloned()
                .ok_or_else(|| Error::RuleEval(format!("unknown fact '{}'", name))),
            Expr::Unary(op, operand) => {
                let value = operand.eval(facts)?;
                match (op, value) {
                    (UnaryOp::Not, FactValue::Bool(b)) => Ok(FactValue::Bool(!b)),
                    (UnaryOp::Neg, FactValue::Number(n)) => Ok(FactValue::Number(-n)),
                    (op, v) => Err(Error::RuleEval(format!(
                        "cannot apply {:?} to {}",
                        op,
                        v.type_name()
                    ))),
                }
            }
            Expr::And(lhs, rhs) => {
                if !lhs.eval_bool(facts)? {
                    return Ok(FactValue::Bool(false));
                }
                Ok(FactValue::Bool(rhs.eval_bool(facts)?))
            }
            Expr::Or(lhs, rhs) => {
                if lhs.eval_bool(facts)? {
                    return Ok(FactValue::Bool(true));
                }
                Ok(FactValue::Bool(rhs.eval_bool(facts)?))
            }
            Expr::Binary(op, lhs, rhs) => {
                let l = lhs.eval(facts)?;
                let r = rhs.eval(facts)?;
                apply_binary(*op, l, r)
            }
        }
    }

    pub(crate) fn eval_bool(&self, facts: &Facts) -> Result<bool> {
        match self.eval(facts)? {
            FactValue::Bool(b) => Ok(b),
            other => Err(Error::RuleEval(format!(
                "expected bool, got {} {}",
                other.type_name(),
                other
            ))),
        }
    }
}

fn apply_binary(op: BinaryOp, l: FactValue, r: FactValue) -> Result<FactValue> {
    use BinaryOp::*;
    use FactValue::*;

    match (op, l, r) {
        (Add, Number(a), Number(b)) => Ok(Number(a + b)),
        (Sub, Number(a), Number(b)) => Ok(Number(a - b)),
        (Mul, Number(a), Number(b)) => Ok(Number(a * b)),
        (Div | Rem, Number(_), Number(b)) if b == 0.0 => {
            Err(Error::RuleEval("division by zero".to_string()))
        }
        (Div, Number(a), Number(b)) => Ok(Number(a / b)),
        (Rem, Number(a), Number(b)) => Ok(Number(a % b)),

        (Eq, a, b) if a.type_name() == b.type_name() => Ok(Bool(a == b)),
        (Ne, a, b) if a.type_name() == b.type_name() => Ok(Bool(a != b)),

        (Lt, Number(a), Number(b)) => Ok(Bool(a < b)),
        (Le, Number(a), Number(b)) => Ok(Bool(a <= b)),
        (Gt, Number(a), Number(b)) => Ok(Bool(a > b)),
        (Ge, Number(a), Number(b)) => Ok(Bool(a >= b)),
        (Lt, Text(a), Text(b)) => Ok(Bool(a < b)),
        (Le, Text(a), Text(b)) => Ok(Bool(a <= b)),
        (Gt, Text(a), Text(b)) => Ok(Bool(a > b)),
        (Ge, Text(a), Text(b)) => Ok(Bool(a >= b)),

        (op, a, b) => Err(Error::RuleEval(format!(
            "cannot apply {:?} to {} and {}",
            op,
            a.type_name(),
            b.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Box<Expr> {
        Box::new(Expr::Literal(FactValue::Number(n)))
    }

    #[test]
    fn test_short_circuit_skips_unknown_fact() {
        let facts = Facts::new();
        let expr = Expr::And(
            Box::new(Expr::Literal(FactValue::Bool(false))),
            Box::new(Expr::Fact("missing".into())),
        );
        assert_eq!(expr.eval(&facts).unwrap(), FactValue::Bool(false));
    }

    #[test]
    fn test_unknown_fact_errors() {
        let facts = Facts::new();
        assert!(Expr::Fact("amount".into()).eval(&facts).is_err());
    }

    #[test]
    fn test_type_mismatch_errors() {
        let expr = Expr::Binary(
            BinaryOp::Gt,
            num(1.0),
            Box::new(Expr::Literal(FactValue::Text("a".into()))),
        );
        assert!(expr.eval(&Facts::new()).is_err());
    }

    #[test]
    fn test_division_by_zero() {
        let expr = Expr::Binary(BinaryOp::Div, num(1.0), num(0.0));
        assert!(expr.eval(&Facts::new()).is_err());
    }

    #[test]
    fn test_non_bool_result() {
        let expr = Expr::Binary(BinaryOp::Add, num(1.0), num(2.0));
        assert!(expr.eval_bool(&Facts::new()).is_err());
    }
}
