//! Team-specific finders.

use super::sqlite_repo::SqliteRepository;
use super::{Repository, SpecificationExecutor};
use crate::error::RepoResult;
use crate::model::{Member, MemberField, Team, TeamField, TeamId, TeamWithMembers};
use crate::query::{Operand, Operator, Sort, Specification, Value};

pub type TeamRepository<'uow> = SqliteRepository<'uow, Team>;

impl SqliteRepository<'_, Team> {
    pub fn find_by_name(&self, name: &str) -> RepoResult<Vec<Team>> {
        let spec = Specification::leaf_unchecked(
            TeamField::Name,
            Operator::Equals,
            Operand::Single(Value::from(name)),
        );
        self.find_all_matching(&spec)
    }

    /// The team and the members currently pointing at it, by username.
    pub fn find_with_members(&self, id: TeamId) -> RepoResult<Option<TeamWithMembers>> {
        let Some(team) = self.find_by_id(id)? else {
            return Ok(None);
        };
        let members = SqliteRepository::<Member>::new(self.unit_of_work()).find_all_matching_sorted(
            &Specification::leaf_unchecked(
                MemberField::TeamId,
                Operator::Equals,
                Operand::Single(Value::from(id)),
            ),
            &Sort::asc(MemberField::Username),
        )?;
        Ok(Some(TeamWithMembers { team, members }))
    }
}
