//! Resource Query Language
//!
//! A request's query string is parsed into a [`Query`]: an optional predicate
//! tree plus sort keys and paging. Bare `name=value` terms are implicit
//! equality and every top-level term is combined with AND.

mod parser;

pub use parser::{parse, parse_terms, split_terms};

use serde_json::Value;
use std::fmt;

pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// Comparison operators recognized in RQL terms
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Contains,
    Sw,
}

impl Operator {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "eq" => Operator::Eq,
            "ne" => Operator::Ne,
            "lt" => Operator::Lt,
            "le" => Operator::Le,
            "gt" => Operator::Gt,
            "ge" => Operator::Ge,
            "in" => Operator::In,
            "w" | "contains" => Operator::Contains,
            "sw" => Operator::Sw,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Lt => "lt",
            Operator::Le => "le",
            Operator::Gt => "gt",
            Operator::Ge => "ge",
            Operator::In => "in",
            Operator::Contains => "contains",
            Operator::Sw => "sw",
        }
    }

    /// Operators a range key condition can express
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge | Operator::Sw
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Leaf comparison `op(attribute, values...)`
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub op: Operator,
    pub attribute: String,
    pub values: Vec<Value>,
    /// The operand was written unquoted, so `*` in it matches anything
    pub wildcard: bool,
}

impl Comparison {
    /// First operand; every comparison has at least one
    pub fn value(&self) -> &Value {
        &self.values[0]
    }

    /// The first operand as a `*` pattern, if it is one
    pub fn pattern(&self) -> Option<&str> {
        match self.value() {
            Value::String(s) if self.wildcard && s.contains('*') => Some(s),
            _ => None,
        }
    }
}

/// Predicate tree, combinators own their children
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare(Comparison),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn compare(op: Operator, attribute: impl Into<String>, value: Value) -> Self {
        Self::compare_many(op, attribute, vec![value])
    }

    pub fn compare_many(op: Operator, attribute: impl Into<String>, values: Vec<Value>) -> Self {
        Predicate::Compare(Comparison {
            op,
            attribute: attribute.into(),
            values,
            wildcard: false,
        })
    }

    /// Comparison whose `*` operands are patterns
    pub fn pattern(op: Operator, attribute: impl Into<String>, value: Value) -> Self {
        Predicate::Compare(Comparison {
            op,
            attribute: attribute.into(),
            values: vec![value],
            wildcard: true,
        })
    }

    /// Top-level conjuncts with nested ANDs flattened
    pub fn conjuncts(&self) -> Vec<&Predicate> {
        match self {
            Predicate::And(children) => children.iter().flat_map(|c| c.conjuncts()).collect(),
            other => vec![other],
        }
    }

    /// AND two optional predicates together
    pub fn conjoin(left: Option<Predicate>, right: Predicate) -> Predicate {
        match left {
            None => right,
            Some(Predicate::And(mut children)) => {
                children.push(right);
                Predicate::And(children)
            }
            Some(other) => Predicate::And(vec![other, right]),
        }
    }
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::String(s) => f.write_str(s),
        other => write!(f, "{}", other),
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, children) = match self {
            Predicate::Compare(c) => {
                write!(f, "{}({}", c.op, c.attribute)?;
                for v in &c.values {
                    f.write_str(",")?;
                    write_value(f, v)?;
                }
                return f.write_str(")");
            }
            Predicate::And(children) => ("and", children),
            Predicate::Or(children) => ("or", children),
        };

        write!(f, "{}(", name)?;
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", child)?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub attribute: String,
    pub direction: SortDirection,
}

/// Requested page; absent values fall back to page 1 of [`DEFAULT_PAGE_SIZE`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PageSpec {
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

impl PageSpec {
    pub fn size(&self) -> u64 {
        self.page_size.filter(|s| *s > 0).unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn number(&self) -> u64 {
        self.page.filter(|p| *p > 0).unwrap_or(1)
    }

    pub fn offset(&self) -> u64 {
        (self.number() - 1) * self.size()
    }
}

/// Parsed request query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub root: Option<Predicate>,
    pub sort: Vec<SortKey>,
    pub page: PageSpec,
}

impl Query {
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.root = Some(Predicate::conjoin(self.root.take(), predicate));
        self
    }
}
