//! Member entity and its field catalog.
//!
//! # Invariants
//! - `username` is non-empty after trimming.
//! - `age >= 0`.
//! - `team_id` references an existing team once the member is flushed; the
//!   storage layer enforces this with a foreign key.

use super::{Entity, EntityKind, MemberId, Record, Team, TeamId};
use crate::error::ValidationError;
use crate::query::field::{EntityField, FieldKind};
use serde::{Deserialize, Serialize};

/// A person who may belong to at most one team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Assigned by the first `save`.
    pub id: Option<MemberId>,
    pub username: String,
    pub age: i32,
    /// Authoritative side of the member/team relation.
    pub team_id: Option<TeamId>,
    /// Persisted version counter, bumped by every update.
    pub version: i64,
}

impl Member {
    /// Creates an unsaved member with age 0 and no team.
    pub fn new(username: impl Into<String>) -> Self {
        Self::with_age(username, 0)
    }

    pub fn with_age(username: impl Into<String>, age: i32) -> Self {
        Self {
            id: None,
            username: username.into(),
            age,
            team_id: None,
            version: 0,
        }
    }

    /// Creates an unsaved member pointing at `team`.
    ///
    /// The team must already carry an id (i.e. it has been saved); otherwise
    /// the member starts without a team.
    pub fn with_team(username: impl Into<String>, age: i32, team: &Team) -> Self {
        let mut member = Self::with_age(username, age);
        member.team_id = team.id;
        member
    }

    pub fn change_team(&mut self, team: &Team) {
        self.team_id = team.id;
    }

    pub fn leave_team(&mut self) {
        self.team_id = None;
    }
}

impl Entity for Member {
    type Id = MemberId;
    type Field = MemberField;

    const KIND: EntityKind = EntityKind::Member;

    fn id(&self) -> Option<MemberId> {
        self.id
    }

    fn ensure_id(&mut self) -> MemberId {
        *self.id.get_or_insert_with(MemberId::new)
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.username.trim().is_empty() {
            return Err(ValidationError::InvalidEntity(
                "member username must not be empty".to_string(),
            ));
        }
        if self.age < 0 {
            return Err(ValidationError::InvalidEntity(format!(
                "member age must be >= 0, got {}",
                self.age
            )));
        }
        Ok(())
    }

    fn into_record(self) -> Record {
        Record::Member(self)
    }

    fn from_record(record: &Record) -> Option<&Self> {
        match record {
            Record::Member(member) => Some(member),
            Record::Team(_) => None,
        }
    }
}

/// Queryable fields of [`Member`].
///
/// `TeamName` is reached through the `team_id` join and is read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberField {
    Id,
    Username,
    Age,
    TeamId,
    TeamName,
    Version,
}

impl EntityField for MemberField {
    const ENTITY: EntityKind = EntityKind::Member;
    const ID: Self = Self::Id;

    fn all() -> &'static [Self] {
        &[
            Self::Id,
            Self::Username,
            Self::Age,
            Self::TeamId,
            Self::TeamName,
            Self::Version,
        ]
    }

    fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Username => "username",
            Self::Age => "age",
            Self::TeamId => "team_id",
            Self::TeamName => "team_name",
            Self::Version => "version",
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::Id => "m.id",
            Self::Username => "m.username",
            Self::Age => "m.age",
            Self::TeamId => "m.team_id",
            Self::TeamName => "t.name",
            Self::Version => "m.version",
        }
    }

    fn write_column(self) -> Option<&'static str> {
        match self {
            Self::Username => Some("username"),
            Self::Age => Some("age"),
            Self::TeamId => Some("team_id"),
            Self::Id | Self::TeamName | Self::Version => None,
        }
    }

    fn kind(self) -> FieldKind {
        match self {
            Self::Id | Self::TeamId => FieldKind::Uuid,
            Self::Username | Self::TeamName => FieldKind::Text,
            Self::Age | Self::Version => FieldKind::Integer,
        }
    }

    fn nullable(self) -> bool {
        matches!(self, Self::TeamId | Self::TeamName)
    }
}
