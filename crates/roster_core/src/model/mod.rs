//! Domain model for members and teams.
//!
//! # Responsibility
//! - Define the persisted entities, their typed ids and field catalogs.
//! - Describe entities generically through [`Entity`], so repositories and the
//!   unit of work stay entity-agnostic.
//!
//! # Invariants
//! - An id, once assigned, is never changed or reused for another entity.
//! - `Member.team_id` is the authoritative side of the member/team relation;
//!   a team's member list is always derived.

mod id;
pub mod member;
pub mod team;
pub mod views;

pub use id::{MemberId, TeamId};
pub use member::{Member, MemberField};
pub use team::{Team, TeamField};
pub use views::{MemberDto, MemberProjection, MemberWithTeam, TeamWithMembers, UsernameOnly};

use crate::error::ValidationError;
use crate::query::field::EntityField;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::Hash;
use uuid::Uuid;

/// Discriminates entity types in type-erased contexts (identity map, locks, logs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Member,
    Team,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Team => "team",
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-erased entity state held by the unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Member(Member),
    Team(Team),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Member(_) => EntityKind::Member,
            Self::Team(_) => EntityKind::Team,
        }
    }

    /// `None` only for records that were never saved.
    pub fn id(&self) -> Option<Uuid> {
        match self {
            Self::Member(member) => member.id.map(Uuid::from),
            Self::Team(team) => team.id.map(Uuid::from),
        }
    }

    pub fn version(&self) -> i64 {
        match self {
            Self::Member(member) => member.version,
            Self::Team(team) => team.version,
        }
    }

    pub fn set_version(&mut self, version: i64) {
        match self {
            Self::Member(member) => member.version = version,
            Self::Team(team) => team.version = version,
        }
    }
}

/// Generic description of a persisted entity.
///
/// Implemented by [`Member`] and [`Team`]; repository and unit-of-work code is
/// written against this trait only.
pub trait Entity: Clone + Debug + Send + 'static {
    type Id: Copy
        + Eq
        + Hash
        + Debug
        + Display
        + Send
        + Sync
        + From<Uuid>
        + Into<Uuid>
        + 'static;
    type Field: EntityField;

    const KIND: EntityKind;

    /// Returns `None` until the entity has been saved once.
    fn id(&self) -> Option<Self::Id>;

    /// Returns the current id, assigning a fresh one when absent.
    fn ensure_id(&mut self) -> Self::Id;

    fn version(&self) -> i64;

    fn set_version(&mut self, version: i64);

    /// Checks field-level invariants before the entity is queued for writing.
    fn validate(&self) -> Result<(), ValidationError>;

    fn into_record(self) -> Record;

    fn from_record(record: &Record) -> Option<&Self>;
}
