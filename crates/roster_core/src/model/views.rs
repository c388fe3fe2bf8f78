//! Read models assembled from joins and partial selects.
//!
//! None of these are tracked by the unit of work; they are snapshots.

use super::{Member, MemberField, MemberId, Team};
use crate::query::field::{FieldSource, Value};
use serde::{Deserialize, Serialize};

/// Closed projection that carries only the username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameOnly {
    pub username: String,
}

/// Member joined with its (mandatory) team name.
///
/// Members without a team are excluded, matching inner-join semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDto {
    pub id: MemberId,
    pub username: String,
    pub team_name: String,
}

/// Member with an optional team name, produced by the paged projection query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberProjection {
    pub id: MemberId,
    pub username: String,
    pub team_name: Option<String>,
}

/// Member loaded together with its team in a single query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberWithTeam {
    pub member: Member,
    pub team: Option<Team>,
}

impl FieldSource<MemberField> for MemberWithTeam {
    fn field_value(&self, field: MemberField) -> Value {
        match field {
            MemberField::Id => Value::from(self.member.id),
            MemberField::Username => Value::from(self.member.username.as_str()),
            MemberField::Age => Value::from(self.member.age),
            MemberField::TeamId => Value::from(self.member.team_id),
            MemberField::TeamName => Value::from(self.team.as_ref().map(|team| team.name.as_str())),
            MemberField::Version => Value::Integer(self.member.version),
        }
    }
}

/// Team with its derived member list, ordered by username then id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamWithMembers {
    pub team: Team,
    pub members: Vec<Member>,
}
