//! Field catalogs and typed values shared by specifications, sorting and updates.

use crate::error::ValidationError;
use crate::model::{EntityKind, MemberId, TeamId};
use rusqlite::types::Value as SqlValue;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Debug;
use std::hash::Hash;
use uuid::Uuid;

/// Storage type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Integer,
    Text,
    Uuid,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Text => "text",
            Self::Uuid => "uuid",
        }
    }
}

/// Static description of one queryable field of an entity.
///
/// Implemented by plain enums (`MemberField`, `TeamField`), which keeps
/// specifications type-checked while derived queries can still resolve fields
/// by name.
pub trait EntityField:
    Copy + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const ENTITY: EntityKind;
    /// The identifier field, used as the final sort key of every window.
    const ID: Self;

    fn all() -> &'static [Self];

    fn name(self) -> &'static str;

    /// Alias-qualified column expression usable in SELECT/WHERE/ORDER BY.
    fn column(self) -> &'static str;

    /// Bare column for UPDATE assignments; `None` when the field is not writable.
    fn write_column(self) -> Option<&'static str>;

    fn kind(self) -> FieldKind;

    fn nullable(self) -> bool;

    fn from_name(name: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|field| field.name() == name)
    }

    /// Like [`EntityField::from_name`], but reports unknown names as validation errors.
    fn parse(name: &str) -> Result<Self, ValidationError> {
        Self::from_name(name).ok_or_else(|| ValidationError::UnknownField {
            entity: Self::ENTITY.as_str(),
            field: name.to_string(),
        })
    }
}

/// Anything a specification can be evaluated against in memory.
pub trait FieldSource<F> {
    fn field_value(&self, field: F) -> Value;
}

/// A literal operand or a field value read from an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Integer(i64),
    Text(String),
    Uuid(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// `None` for `Null`, which is compatible with any nullable field.
    pub fn kind(&self) -> Option<FieldKind> {
        match self {
            Self::Null => None,
            Self::Integer(_) => Some(FieldKind::Integer),
            Self::Text(_) => Some(FieldKind::Text),
            Self::Uuid(_) => Some(FieldKind::Uuid),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind().map_or("null", FieldKind::as_str)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Orders two values of the same kind; `None` across kinds or with `Null`.
    pub(crate) fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Integer(left), Self::Integer(right)) => Some(left.cmp(right)),
            (Self::Text(left), Self::Text(right)) => Some(left.as_bytes().cmp(right.as_bytes())),
            (Self::Uuid(left), Self::Uuid(right)) => Some(left.cmp(right)),
            _ => None,
        }
    }

    pub(crate) fn to_sql(&self) -> SqlValue {
        match self {
            Self::Null => SqlValue::Null,
            Self::Integer(value) => SqlValue::Integer(*value),
            Self::Text(value) => SqlValue::Text(value.clone()),
            Self::Uuid(value) => SqlValue::Text(value.to_string()),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<MemberId> for Value {
    fn from(value: MemberId) -> Self {
        Self::Uuid(value.into())
    }
}

impl From<TeamId> for Value {
    fn from(value: TeamId) -> Self {
        Self::Uuid(value.into())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemberField;

    #[test]
    fn parse_reports_unknown_field_with_entity_name() {
        let err = MemberField::parse("nickname").unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownField {
                entity: "member",
                field: "nickname".to_string(),
            }
        );
    }

    #[test]
    fn compare_only_orders_matching_kinds() {
        assert_eq!(
            Value::from(10).compare(&Value::from(15)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::from("b").compare(&Value::from("a")), Some(Ordering::Greater));
        assert_eq!(Value::from(10).compare(&Value::from("10")), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
    }

    #[test]
    fn uuid_values_bind_as_hyphenated_text() {
        let id = Uuid::parse_str("00000000-0000-4000-8000-000000000001").unwrap();
        assert_eq!(
            Value::from(id).to_sql(),
            SqlValue::Text("00000000-0000-4000-8000-000000000001".to_string())
        );
    }
}
