//! Evaluate a predicate against a single record's fields. Used both client-side (routing incoming change
//! events to the subscriptions that asked for them) and by backends that filter before delivery.

use crate::ast::{ComparisonOperator, Expr, Literal, Predicate};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("property not found: {0}")]
    PropertyNotFound(String),
}

/// Anything that can answer "what is the value of field X" for predicate evaluation.
/// Values are carried as strings. A quoted literal on either side makes the comparison exact string comparison;
/// otherwise comparisons are numeric when both sides parse as numbers.
pub trait Filterable {
    fn value(&self, name: &str) -> Option<String>;
}

impl Filterable for BTreeMap<String, String> {
    fn value(&self, name: &str) -> Option<String> { self.get(name).cloned() }
}

impl Filterable for HashMap<String, String> {
    fn value(&self, name: &str) -> Option<String> { self.get(name).cloned() }
}

struct Operand {
    text: String,
    quoted: bool,
}

impl From<&Literal> for Operand {
    fn from(literal: &Literal) -> Self { Operand { text: literal.as_value(), quoted: matches!(literal, Literal::String(_)) } }
}

fn evaluate_expr<R: Filterable + ?Sized>(record: &R, expr: &Expr) -> Result<Operand, Error> {
    match expr {
        Expr::Literal(lit) => Ok(Operand::from(lit)),
        Expr::Identifier(name) => {
            let text = record.value(name).ok_or_else(|| Error::PropertyNotFound(name.clone()))?;
            Ok(Operand { text, quoted: false })
        }
    }
}

/// `None` when the operands are unordered (NaN)
fn compare(left: &Operand, right: &Operand) -> Option<Ordering> {
    if left.quoted || right.quoted {
        return Some(left.text.cmp(&right.text));
    }
    match (left.text.parse::<f64>(), right.text.parse::<f64>()) {
        (Ok(l), Ok(r)) => l.partial_cmp(&r),
        _ => Some(left.text.cmp(&right.text)),
    }
}

pub fn evaluate_predicate<R: Filterable + ?Sized>(record: &R, predicate: &Predicate) -> Result<bool, Error> {
    match predicate {
        Predicate::Comparison { left, operator, right } => {
            let ordering = compare(&evaluate_expr(record, left)?, &evaluate_expr(record, right)?);
            Ok(match operator {
                ComparisonOperator::Equal => ordering == Some(Ordering::Equal),
                ComparisonOperator::NotEqual => ordering != Some(Ordering::Equal),
                ComparisonOperator::GreaterThan => ordering == Some(Ordering::Greater),
                ComparisonOperator::GreaterThanOrEqual => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
                ComparisonOperator::LessThan => ordering == Some(Ordering::Less),
                ComparisonOperator::LessThanOrEqual => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            })
        }
        Predicate::In { expr, list } => {
            let value = evaluate_expr(record, expr)?;
            Ok(list.iter().map(Operand::from).any(|candidate| compare(&value, &candidate) == Some(Ordering::Equal)))
        }
        Predicate::IsNull(expr) => match &**expr {
            Expr::Identifier(name) => Ok(record.value(name).is_none()),
            Expr::Literal(_) => Ok(false),
        },
        Predicate::And(left, right) => Ok(evaluate_predicate(record, left)? && evaluate_predicate(record, right)?),
        Predicate::Or(left, right) => Ok(evaluate_predicate(record, left)? || evaluate_predicate(record, right)?),
        Predicate::Not(pred) => Ok(!evaluate_predicate(record, pred)?),
        Predicate::True => Ok(true),
        Predicate::False => Ok(false),
    }
}
