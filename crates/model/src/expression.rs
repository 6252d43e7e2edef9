//! Condition evaluation.
//!
//! A condition list is an OR of AND groups of [`NodeExpression`]s. The
//! engine only depends on the [`Expression`] trait; [`SimpleExpression`] is
//! the built-in comparison evaluator.

use std::str::FromStr;

use serde_json::Value;

use crate::node::{NodeExpression, Variables};
use crate::ModelError;

/// Boolean predicate over instance variables.
pub trait Expression: Send + Sync {
    /// `true` when any group has all of its expressions satisfied.
    /// An empty list never matches.
    fn eval(&self, groups: &[Vec<NodeExpression>], args: &Variables) -> Result<bool, ModelError>;
}

/// Comparison operators understood by [`SimpleExpression`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Include,
    Exclude,
}

impl FromStr for Operator {
    type Err = ModelError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "==" | "eq"                  => Ok(Self::Eq),
            "!=" | "ne"                  => Ok(Self::Ne),
            ">" | "gt"                   => Ok(Self::Gt),
            ">=" | "ge"                  => Ok(Self::Ge),
            "<" | "lt"                   => Ok(Self::Lt),
            "<=" | "le"                  => Ok(Self::Le),
            "include" | "contains"       => Ok(Self::Include),
            "exclude" | "notcontains"    => Ok(Self::Exclude),
            other                        => Err(ModelError::UnknownOperator(other.to_owned())),
        }
    }
}

/// Check that an expression can be evaluated at all.
pub fn check_expression(expr: &NodeExpression) -> Result<(), ModelError> {
    if expr.field.trim().is_empty() {
        return Err(ModelError::MalformedCondition {
            node_key: String::new(),
            reason: "expression field is empty".into(),
        });
    }
    expr.operator.parse::<Operator>().map(|_| ())
}

/// Default evaluator: numeric, string and array comparisons.
///
/// A variable that is absent from `args` fails every comparison.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleExpression;

impl Expression for SimpleExpression {
    fn eval(&self, groups: &[Vec<NodeExpression>], args: &Variables) -> Result<bool, ModelError> {
        for group in groups {
            if group.is_empty() {
                continue;
            }
            let mut all = true;
            for expr in group {
                if !test(expr, args)? {
                    all = false;
                    break;
                }
            }
            if all {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn test(expr: &NodeExpression, args: &Variables) -> Result<bool, ModelError> {
    let op: Operator = expr.operator.parse()?;
    let Some(actual) = args.get(&expr.field) else {
        return Ok(false);
    };
    let expected = &expr.value;

    Ok(match op {
        Operator::Eq => loosely_equal(actual, expected),
        Operator::Ne => !loosely_equal(actual, expected),
        Operator::Gt => ordering(actual, expected).is_some_and(|o| o.is_gt()),
        Operator::Ge => ordering(actual, expected).is_some_and(|o| o.is_ge()),
        Operator::Lt => ordering(actual, expected).is_some_and(|o| o.is_lt()),
        Operator::Le => ordering(actual, expected).is_some_and(|o| o.is_le()),
        Operator::Include => includes(actual, expected),
        Operator::Exclude => !includes(actual, expected),
    })
}

fn numeric(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (numeric(a), numeric(b)) {
        return x == y;
    }
    match (a, b) {
        (Value::String(x), other) | (other, Value::String(x)) if !other.is_string() => {
            *x == other.to_string()
        }
        _ => a == b,
    }
}

fn ordering(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (numeric(a), numeric(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn includes(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => match needle {
            Value::String(n) => s.contains(n.as_str()),
            other => s.contains(&other.to_string()),
        },
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, needle)),
        _ => false,
    }
}
