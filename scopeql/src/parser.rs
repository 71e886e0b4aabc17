use crate::ast;
use crate::error::ParseError;
use crate::grammar::{Rule, ScopeqlParser};
use pest::iterators::Pair;
use pest::Parser;

/// Parse a selection expression into a predicate AST.
/// The selection must be a valid boolean expression using AND, OR, NOT and comparison operators.
pub fn parse_selection(input: &str) -> Result<ast::Predicate, ParseError> {
    if input.trim().is_empty() {
        return Err(ParseError::EmptyExpression);
    }
    let mut pairs = ScopeqlParser::parse(Rule::Selection, input)?;

    // Selection is silent, so the first pair is the top-level Or
    let or = pairs.next().ok_or(ParseError::EmptyExpression)?;
    expect(&or, Rule::Or, "Or")?;
    parse_or(or)
}

fn expect(pair: &Pair<Rule>, rule: Rule, expected: &'static str) -> Result<(), ParseError> {
    if pair.as_rule() != rule {
        return Err(ParseError::UnexpectedRule { expected, got: pair.as_rule() });
    }
    Ok(())
}

/// Fold `a OR b OR c` left-associatively
fn parse_or(pair: Pair<Rule>) -> Result<ast::Predicate, ParseError> {
    let mut result: Option<ast::Predicate> = None;
    for inner in pair.into_inner().filter(|p| p.as_rule() != Rule::OrOp) {
        let next = parse_and(inner)?;
        result = Some(match result {
            None => next,
            Some(left) => ast::Predicate::Or(Box::new(left), Box::new(next)),
        });
    }
    result.ok_or(ParseError::MissingOperand("or"))
}

fn parse_and(pair: Pair<Rule>) -> Result<ast::Predicate, ParseError> {
    expect(&pair, Rule::And, "And")?;
    let mut result: Option<ast::Predicate> = None;
    for inner in pair.into_inner().filter(|p| p.as_rule() != Rule::AndOp) {
        let next = parse_unary(inner)?;
        result = Some(match result {
            None => next,
            Some(left) => ast::Predicate::And(Box::new(left), Box::new(next)),
        });
    }
    result.ok_or(ParseError::MissingOperand("and"))
}

fn parse_unary(pair: Pair<Rule>) -> Result<ast::Predicate, ParseError> {
    expect(&pair, Rule::Unary, "Unary")?;
    let mut negations = 0;
    let mut primary = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::NotOp => negations += 1,
            _ => primary = Some(parse_primary(inner)?),
        }
    }
    let mut predicate = primary.ok_or(ParseError::MissingOperand("unary"))?;
    for _ in 0..negations {
        predicate = ast::Predicate::Not(Box::new(predicate));
    }
    Ok(predicate)
}

fn parse_primary(pair: Pair<Rule>) -> Result<ast::Predicate, ParseError> {
    match pair.as_rule() {
        Rule::Parenthesized => {
            let inner = pair.into_inner().next().ok_or(ParseError::EmptyExpression)?;
            parse_or(inner)
        }
        Rule::Condition => parse_condition(pair),
        Rule::Boolean => match parse_literal(pair)? {
            ast::Literal::Boolean(true) => Ok(ast::Predicate::True),
            _ => Ok(ast::Predicate::False),
        },
        got => Err(ParseError::UnexpectedRule { expected: "parenthesized expression, condition or boolean", got }),
    }
}

fn parse_condition(pair: Pair<Rule>) -> Result<ast::Predicate, ParseError> {
    let mut inner = pair.into_inner();
    let left = parse_operand(inner.next().ok_or(ParseError::MissingOperand("left"))?)?;
    let op = inner.next().ok_or(ParseError::MissingOperand("operator"))?;

    let operator = match op.as_rule() {
        Rule::IsNull => return Ok(ast::Predicate::IsNull(Box::new(left))),
        Rule::IsNotNull => return Ok(ast::Predicate::Not(Box::new(ast::Predicate::IsNull(Box::new(left))))),
        Rule::InList => {
            let list = op.into_inner().filter(|p| p.as_rule() != Rule::InKw).map(parse_literal).collect::<Result<Vec<_>, _>>()?;
            return Ok(ast::Predicate::In { expr: Box::new(left), list });
        }
        Rule::Eq => ast::ComparisonOperator::Equal,
        Rule::NotEq => ast::ComparisonOperator::NotEqual,
        Rule::Gt => ast::ComparisonOperator::GreaterThan,
        Rule::GtEq => ast::ComparisonOperator::GreaterThanOrEqual,
        Rule::Lt => ast::ComparisonOperator::LessThan,
        Rule::LtEq => ast::ComparisonOperator::LessThanOrEqual,
        got => return Err(ParseError::UnexpectedRule { expected: "comparison operator, IS NULL or IN", got }),
    };

    let right = parse_operand(inner.next().ok_or(ParseError::MissingOperand("right"))?)?;
    Ok(ast::Predicate::Comparison { left: Box::new(left), operator, right: Box::new(right) })
}

fn parse_operand(pair: Pair<Rule>) -> Result<ast::Expr, ParseError> {
    match pair.as_rule() {
        Rule::Identifier => Ok(ast::Expr::Identifier(pair.as_str().to_string())),
        _ => Ok(ast::Expr::Literal(parse_literal(pair)?)),
    }
}

fn parse_literal(pair: Pair<Rule>) -> Result<ast::Literal, ParseError> {
    match pair.as_rule() {
        Rule::String => {
            // String is compound-atomic, its only child is the unquoted body
            let body = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Ok(ast::Literal::String(body.replace("''", "'")))
        }
        Rule::Number => {
            let text = pair.as_str();
            let invalid = |reason: String| ParseError::InvalidLiteral { literal: text.to_string(), reason };
            if text.contains('.') {
                text.parse::<f64>().map(ast::Literal::Float).map_err(|e| invalid(e.to_string()))
            } else {
                text.parse::<i64>().map(ast::Literal::Integer).map_err(|e| invalid(e.to_string()))
            }
        }
        Rule::Boolean => Ok(ast::Literal::Boolean(pair.as_str().eq_ignore_ascii_case("true"))),
        got => Err(ParseError::UnexpectedRule { expected: "literal", got }),
    }
}
