use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    Identifier(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Comparison { left: Box<Expr>, operator: ComparisonOperator, right: Box<Expr> },
    In { expr: Box<Expr>, list: Vec<Literal> },
    IsNull(Box<Expr>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    True,
    False,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    Equal,              // =
    NotEqual,           // <> or !=
    GreaterThan,        // >
    GreaterThanOrEqual, // >=
    LessThan,           // <
    LessThanOrEqual,    // <=
}

impl Literal {
    /// The literal as the string form used for comparisons against record values
    pub fn as_value(&self) -> String {
        match self {
            Literal::String(s) => s.clone(),
            Literal::Integer(i) => i.to_string(),
            Literal::Float(f) => f.to_string(),
            Literal::Boolean(b) => b.to_string(),
        }
    }
}

impl Expr {
    fn collect_field<'a>(&'a self, fields: &mut BTreeSet<&'a str>) {
        if let Expr::Identifier(name) = self {
            fields.insert(name.as_str());
        }
    }
}

impl Predicate {
    /// Field equals a string literal. The most common building block for scope filters.
    pub fn field_eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Predicate::Comparison {
            left: Box::new(Expr::Identifier(field.into())),
            operator: ComparisonOperator::Equal,
            right: Box::new(Expr::Literal(Literal::String(value.into()))),
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::True, p) | (p, Predicate::True) => p,
            (left, right) => Predicate::And(Box::new(left), Box::new(right)),
        }
    }

    pub fn or(self, other: Predicate) -> Self { Predicate::Or(Box::new(self), Box::new(other)) }

    /// Every identifier referenced anywhere in the predicate
    pub fn referenced_fields(&self) -> BTreeSet<&str> {
        let mut fields = BTreeSet::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields<'a>(&'a self, fields: &mut BTreeSet<&'a str>) {
        match self {
            Predicate::Comparison { left, right, .. } => {
                left.collect_field(fields);
                right.collect_field(fields);
            }
            Predicate::In { expr, .. } | Predicate::IsNull(expr) => expr.collect_field(fields),
            Predicate::And(l, r) | Predicate::Or(l, r) => {
                l.collect_fields(fields);
                r.collect_fields(fields);
            }
            Predicate::Not(p) => p.collect_fields(fields),
            Predicate::True | Predicate::False => {}
        }
    }

    /// Literals that the top-level AND chain pins `field` to with `=`.
    ///
    /// Only conjuncts are inspected; an equality under OR or NOT does not constrain the whole predicate.
    pub fn equalities(&self, field: &str) -> Vec<&Literal> {
        let mut out = Vec::new();
        self.collect_equalities(field, &mut out);
        out
    }

    fn collect_equalities<'a>(&'a self, field: &str, out: &mut Vec<&'a Literal>) {
        match self {
            Predicate::And(l, r) => {
                l.collect_equalities(field, out);
                r.collect_equalities(field, out);
            }
            Predicate::Comparison { left, operator: ComparisonOperator::Equal, right } => match (&**left, &**right) {
                (Expr::Identifier(name), Expr::Literal(lit)) | (Expr::Literal(lit), Expr::Identifier(name)) if name == field => {
                    out.push(lit)
                }
                _ => {}
            },
            _ => {}
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Literal::Integer(i) => write!(f, "{}", i),
            Literal::Float(v) => {
                // keep a decimal point so the rendered text parses back as a float
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{:.1}", v)
                } else {
                    write!(f, "{}", v)
                }
            }
            Literal::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::Identifier(name) => write!(f, "{}", name),
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            ComparisonOperator::Equal => "=",
            ComparisonOperator::NotEqual => "!=",
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::GreaterThanOrEqual => ">=",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::LessThanOrEqual => "<=",
        };
        f.write_str(op)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Comparison { left, operator, right } => write!(f, "{} {} {}", left, operator, right),
            Predicate::In { expr, list } => {
                let items: Vec<String> = list.iter().map(|l| l.to_string()).collect();
                write!(f, "{} IN ({})", expr, items.join(", "))
            }
            Predicate::IsNull(expr) => write!(f, "{} IS NULL", expr),
            Predicate::And(l, r) => {
                write_operand(f, l, matches!(**l, Predicate::Or(..)))?;
                f.write_str(" AND ")?;
                write_operand(f, r, matches!(**r, Predicate::Or(..) | Predicate::And(..)))
            }
            Predicate::Or(l, r) => {
                write_operand(f, l, false)?;
                f.write_str(" OR ")?;
                write_operand(f, r, matches!(**r, Predicate::Or(..)))
            }
            Predicate::Not(p) => {
                f.write_str("NOT ")?;
                write_operand(f, p, matches!(**p, Predicate::And(..) | Predicate::Or(..)))
            }
            Predicate::True => f.write_str("true"),
            Predicate::False => f.write_str("false"),
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, p: &Predicate, parens: bool) -> fmt::Result {
    if parens {
        write!(f, "({})", p)
    } else {
        write!(f, "{}", p)
    }
}
