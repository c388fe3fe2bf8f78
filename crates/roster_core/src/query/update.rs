//! Validated set-based mutations.

use super::field::{EntityField, FieldKind, Value};
use super::spec::Specification;
use crate::config::BulkCachePolicy;
use crate::error::ValidationError;
use rusqlite::types::Value as SqlValue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignValue {
    Set(Value),
    /// `column = column + delta`; integer fields only.
    Add(i64),
}

/// One `SET` term of a bulk update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment<F> {
    field: F,
    column: &'static str,
    value: AssignValue,
}

impl<F: EntityField> Assignment<F> {
    pub fn set(field: F, value: impl Into<Value>) -> Result<Self, ValidationError> {
        let value = value.into();
        let column = writable_column(field)?;
        match value.kind() {
            None if !field.nullable() => {
                return Err(ValidationError::InvalidAssignment {
                    field: field.name(),
                    reason: "field is not nullable",
                });
            }
            Some(kind) if kind != field.kind() => {
                return Err(ValidationError::OperandType {
                    field: field.name(),
                    expected: field.kind().as_str(),
                    actual: value.type_name(),
                });
            }
            _ => {}
        }
        Ok(Self {
            field,
            column,
            value: AssignValue::Set(value),
        })
    }

    pub fn add(field: F, delta: i64) -> Result<Self, ValidationError> {
        let column = writable_column(field)?;
        if field.kind() != FieldKind::Integer {
            return Err(ValidationError::InvalidAssignment {
                field: field.name(),
                reason: "increment needs an integer field",
            });
        }
        Ok(Self {
            field,
            column,
            value: AssignValue::Add(delta),
        })
    }

    pub fn field(&self) -> F {
        self.field
    }

    pub fn value(&self) -> &AssignValue {
        &self.value
    }

    /// Renders `column = <expr>` and its parameter.
    pub(crate) fn to_sql(&self) -> (String, SqlValue) {
        let column = self.column;
        match &self.value {
            AssignValue::Set(value) => (format!("{column} = ?"), value.to_sql()),
            AssignValue::Add(delta) => (
                format!("{column} = {column} + ?"),
                SqlValue::Integer(*delta),
            ),
        }
    }
}

fn writable_column<F: EntityField>(field: F) -> Result<&'static str, ValidationError> {
    field
        .write_column()
        .ok_or(ValidationError::InvalidAssignment {
            field: field.name(),
            reason: "field is not writable",
        })
}

/// Filter plus assignments applied to every matching row in one statement.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkUpdate<F> {
    spec: Specification<F>,
    assignments: Vec<Assignment<F>>,
    cache_policy: Option<BulkCachePolicy>,
}

impl<F: EntityField> BulkUpdate<F> {
    pub fn new(
        spec: Specification<F>,
        assignments: Vec<Assignment<F>>,
    ) -> Result<Self, ValidationError> {
        if assignments.is_empty() {
            return Err(ValidationError::EmptyAssignments);
        }
        Ok(Self {
            spec,
            assignments,
            cache_policy: None,
        })
    }

    /// Overrides the configured identity-map policy for this update only.
    pub fn with_cache_policy(mut self, policy: BulkCachePolicy) -> Self {
        self.cache_policy = Some(policy);
        self
    }

    pub fn spec(&self) -> &Specification<F> {
        &self.spec
    }

    pub fn assignments(&self) -> &[Assignment<F>] {
        &self.assignments
    }

    pub fn cache_policy(&self) -> Option<BulkCachePolicy> {
        self.cache_policy
    }
}
