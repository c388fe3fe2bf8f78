//! Team entity and its field catalog.

use super::{Entity, EntityKind, Record, TeamId};
use crate::error::ValidationError;
use crate::query::field::{EntityField, FieldKind, FieldSource, Value};
use serde::{Deserialize, Serialize};

/// A named group of members.
///
/// Members are not stored on the team; see
/// [`crate::repo::TeamRepository::find_with_members`] for the derived view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: Option<TeamId>,
    pub name: String,
    pub version: i64,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            version: 0,
        }
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }
}

impl Entity for Team {
    type Id = TeamId;
    type Field = TeamField;

    const KIND: EntityKind = EntityKind::Team;

    fn id(&self) -> Option<TeamId> {
        self.id
    }

    fn ensure_id(&mut self) -> TeamId {
        *self.id.get_or_insert_with(TeamId::new)
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::InvalidEntity(
                "team name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn into_record(self) -> Record {
        Record::Team(self)
    }

    fn from_record(record: &Record) -> Option<&Self> {
        match record {
            Record::Team(team) => Some(team),
            Record::Member(_) => None,
        }
    }
}

/// Queryable fields of [`Team`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamField {
    Id,
    Name,
    Version,
}

impl EntityField for TeamField {
    const ENTITY: EntityKind = EntityKind::Team;
    const ID: Self = Self::Id;

    fn all() -> &'static [Self] {
        &[Self::Id, Self::Name, Self::Version]
    }

    fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::Version => "version",
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::Id => "t.id",
            Self::Name => "t.name",
            Self::Version => "t.version",
        }
    }

    fn write_column(self) -> Option<&'static str> {
        match self {
            Self::Name => Some("name"),
            Self::Id | Self::Version => None,
        }
    }

    fn kind(self) -> FieldKind {
        match self {
            Self::Id => FieldKind::Uuid,
            Self::Name => FieldKind::Text,
            Self::Version => FieldKind::Integer,
        }
    }

    fn nullable(self) -> bool {
        false
    }
}

impl FieldSource<TeamField> for Team {
    fn field_value(&self, field: TeamField) -> Value {
        match field {
            TeamField::Id => Value::from(self.id),
            TeamField::Name => Value::from(self.name.as_str()),
            TeamField::Version => Value::Integer(self.version),
        }
    }
}
