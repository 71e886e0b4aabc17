use crate::grammar::Rule;
use thiserror::Error;

/// Error produced while parsing a scope filter
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Syntax error: {0}")]
    SyntaxError(Box<pest::error::Error<Rule>>),
    #[error("Empty expression")]
    EmptyExpression,
    #[error("Expected {expected}, got {got:?}")]
    UnexpectedRule { expected: &'static str, got: Rule },
    #[error("Invalid literal {literal:?}: {reason}")]
    InvalidLiteral { literal: String, reason: String },
    #[error("Missing {0} operand")]
    MissingOperand(&'static str),
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self { ParseError::SyntaxError(Box::new(err)) }
}
