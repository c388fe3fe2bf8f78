//! Specification expression trees.
//!
//! # Responsibility
//! - Represent composable predicates over one entity's fields.
//! - Evaluate them in memory against any [`FieldSource`].
//!
//! # Invariants
//! - A comparison against a NULL field value is false; only `IsNull` and
//!   `IsNotNull` observe NULL. `Not` is therefore plain boolean negation, and
//!   the SQL compiled by `query::sql` agrees with [`Specification::matches`].
//! - `And` stops at the first false child, `Or` at the first true child.
//!
//! # See also
//! - `query::sql` for the SQL rendering of the same tree.

use super::field::{EntityField, FieldKind, FieldSource, Value};
use crate::error::ValidationError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Comparison applied by a single condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    LessThanEqual,
    /// SQL `LIKE` pattern (`%` any run, `_` one character), case-sensitive.
    Like,
    StartingWith,
    Containing,
    In,
    IsNull,
    IsNotNull,
}

/// Number of operands an operator consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    None,
    Single,
    List,
}

impl Operator {
    pub fn arity(self) -> Arity {
        match self {
            Self::IsNull | Self::IsNotNull => Arity::None,
            Self::In => Arity::List,
            _ => Arity::Single,
        }
    }

    /// Whether the operator may be applied to a field of `kind`.
    pub fn accepts(self, kind: FieldKind, nullable: bool) -> bool {
        match self {
            Self::Equals | Self::NotEquals | Self::In => true,
            Self::GreaterThan | Self::GreaterThanEqual | Self::LessThan | Self::LessThanEqual => {
                matches!(kind, FieldKind::Integer | FieldKind::Text)
            }
            Self::Like | Self::StartingWith | Self::Containing => kind == FieldKind::Text,
            Self::IsNull | Self::IsNotNull => nullable,
        }
    }
}

/// Operand bound to a condition; its shape follows [`Operator::arity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "value", rename_all = "snake_case")]
pub enum Operand {
    None,
    Single(Value),
    List(Vec<Value>),
}

impl Operand {
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Single(value.into())
    }

    pub fn list<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// One `field <op> operand` leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition<F> {
    field: F,
    op: Operator,
    operand: Operand,
}

impl<F: EntityField> Condition<F> {
    pub fn new(field: F, op: Operator, operand: Operand) -> Result<Self, ValidationError> {
        let condition = Self::unchecked(field, op, operand);
        condition.validate()?;
        Ok(condition)
    }

    /// Builds a condition whose operand is known to fit the field.
    pub(crate) fn unchecked(field: F, op: Operator, operand: Operand) -> Self {
        Self { field, op, operand }
    }

    pub fn field(&self) -> F {
        self.field
    }

    pub fn op(&self) -> Operator {
        self.op
    }

    pub fn operand(&self) -> &Operand {
        &self.operand
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let field = self.field;
        if !self.op.accepts(field.kind(), field.nullable()) {
            return Err(ValidationError::InvalidOperator {
                field: field.name(),
                op: self.op,
            });
        }
        match (self.op.arity(), &self.operand) {
            (Arity::None, Operand::None) => Ok(()),
            (Arity::Single, Operand::Single(value)) => check_operand(field, value),
            (Arity::List, Operand::List(values)) => values
                .iter()
                .try_for_each(|value| check_operand(field, value)),
            _ => Err(ValidationError::OperandShape {
                field: field.name(),
                op: self.op,
            }),
        }
    }

    pub fn matches<S: FieldSource<F> + ?Sized>(&self, source: &S) -> bool {
        let actual = source.field_value(self.field);
        match (self.op, &self.operand) {
            (Operator::IsNull, _) => actual.is_null(),
            (Operator::IsNotNull, _) => !actual.is_null(),
            _ if actual.is_null() => false,
            (Operator::Equals, Operand::Single(expected)) => actual == *expected,
            (Operator::NotEquals, Operand::Single(expected)) => actual != *expected,
            (Operator::GreaterThan, Operand::Single(bound)) => {
                actual.compare(bound) == Some(Ordering::Greater)
            }
            (Operator::GreaterThanEqual, Operand::Single(bound)) => {
                matches!(actual.compare(bound), Some(Ordering::Greater | Ordering::Equal))
            }
            (Operator::LessThan, Operand::Single(bound)) => {
                actual.compare(bound) == Some(Ordering::Less)
            }
            (Operator::LessThanEqual, Operand::Single(bound)) => {
                matches!(actual.compare(bound), Some(Ordering::Less | Ordering::Equal))
            }
            (Operator::Like, Operand::Single(Value::Text(pattern))) => actual
                .as_text()
                .is_some_and(|text| like_matches(pattern, text)),
            (Operator::StartingWith, Operand::Single(Value::Text(prefix))) => actual
                .as_text()
                .is_some_and(|text| text.starts_with(prefix.as_str())),
            (Operator::Containing, Operand::Single(Value::Text(needle))) => actual
                .as_text()
                .is_some_and(|text| text.contains(needle.as_str())),
            (Operator::In, Operand::List(values)) => values.contains(&actual),
            _ => false,
        }
    }
}

fn check_operand<F: EntityField>(field: F, value: &Value) -> Result<(), ValidationError> {
    match value.kind() {
        Some(kind) if kind == field.kind() => Ok(()),
        _ => Err(ValidationError::OperandType {
            field: field.name(),
            expected: field.kind().as_str(),
            actual: value.type_name(),
        }),
    }
}

/// Translates a `LIKE` pattern into an anchored regex and tests `text`.
fn like_matches(pattern: &str, text: &str) -> bool {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push_str("(?s)^");
    for ch in pattern.chars() {
        match ch {
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');
    Regex::new(&source).is_ok_and(|re| re.is_match(text))
}

/// Predicate tree over the fields `F` of one entity.
///
/// `All` is the identity element: it matches everything and disappears when
/// combined with `and`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "args", rename_all = "snake_case")]
pub enum Specification<F> {
    All,
    Leaf(Condition<F>),
    And(Box<Specification<F>>, Box<Specification<F>>),
    Or(Box<Specification<F>>, Box<Specification<F>>),
    Not(Box<Specification<F>>),
}

impl<F> Default for Specification<F> {
    fn default() -> Self {
        Self::All
    }
}

impl<F: EntityField> Specification<F> {
    pub fn all() -> Self {
        Self::All
    }

    pub fn condition(field: F, op: Operator, operand: Operand) -> Result<Self, ValidationError> {
        Condition::new(field, op, operand).map(Self::Leaf)
    }

    pub fn equal(field: F, value: impl Into<Value>) -> Result<Self, ValidationError> {
        Self::condition(field, Operator::Equals, Operand::value(value))
    }

    pub fn is_null(field: F) -> Result<Self, ValidationError> {
        Self::condition(field, Operator::IsNull, Operand::None)
    }

    pub(crate) fn leaf_unchecked(field: F, op: Operator, operand: Operand) -> Self {
        Self::Leaf(Condition::unchecked(field, op, operand))
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::All, other) => other,
            (this, Self::All) => this,
            (this, other) => Self::And(Box::new(this), Box::new(other)),
        }
    }

    pub fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::All, _) | (_, Self::All) => Self::All,
            (this, other) => Self::Or(Box::new(this), Box::new(other)),
        }
    }

    /// Conjunction of every spec in `specs`; `All` when empty.
    pub fn all_of(specs: impl IntoIterator<Item = Self>) -> Self {
        specs.into_iter().fold(Self::All, Self::and)
    }

    pub fn matches<S: FieldSource<F> + ?Sized>(&self, source: &S) -> bool {
        match self {
            Self::All => true,
            Self::Leaf(condition) => condition.matches(source),
            Self::And(left, right) => left.matches(source) && right.matches(source),
            Self::Or(left, right) => left.matches(source) || right.matches(source),
            Self::Not(inner) => !inner.matches(source),
        }
    }

    /// Re-checks every leaf; needed for trees that arrived through serde.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::All => Ok(()),
            Self::Leaf(condition) => condition.validate(),
            Self::And(left, right) | Self::Or(left, right) => {
                left.validate()?;
                right.validate()
            }
            Self::Not(inner) => inner.validate(),
        }
    }
}

impl<F: EntityField> std::ops::Not for Specification<F> {
    type Output = Self;

    fn not(self) -> Self {
        Self::Not(Box::new(self))
    }
}
