//! Member-specific finders.
//!
//! Fixed finders are declared once as [`DerivedQuery`] values and validated
//! the first time they are used; a bad declaration surfaces as
//! `RepoError::Validation` before any SQL is prepared.

use super::sqlite_repo::SqliteRepository;
use super::{Repository, SpecificationExecutor};
use crate::engine::LockMode;
use crate::error::{RepoError, RepoResult, ValidationError};
use crate::model::{
    Member, MemberDto, MemberField, MemberProjection, MemberWithTeam, UsernameOnly,
};
use crate::query::{
    Assignment, DerivedQuery, Direction, Operand, Operator, Page, PageRequest, Slice, Sort,
    Specification,
};
use log::debug;
use once_cell::sync::Lazy;

pub type MemberRepository<'uow> = SqliteRepository<'uow, Member>;

type PreparedQuery = Lazy<Result<DerivedQuery<MemberField>, ValidationError>>;

static BY_USERNAME_AND_AGE_GREATER_THAN: PreparedQuery = Lazy::new(|| {
    DerivedQuery::<MemberField>::builder()
        .and("username", Operator::Equals)
        .and("age", Operator::GreaterThan)
        .build()
});

static BY_USERNAME: PreparedQuery = Lazy::new(|| {
    DerivedQuery::<MemberField>::builder()
        .and("username", Operator::Equals)
        .build()
});

static BY_USERNAME_AND_AGE: PreparedQuery = Lazy::new(|| {
    DerivedQuery::<MemberField>::builder()
        .and("username", Operator::Equals)
        .and("age", Operator::Equals)
        .build()
});

static BY_USERNAME_IN: PreparedQuery = Lazy::new(|| {
    DerivedQuery::<MemberField>::builder()
        .and("username", Operator::In)
        .build()
});

static BY_AGE: PreparedQuery = Lazy::new(|| {
    DerivedQuery::<MemberField>::builder()
        .and("age", Operator::Equals)
        .build()
});

static WITH_TEAM: PreparedQuery = Lazy::new(|| {
    DerivedQuery::<MemberField>::builder()
        .and("team_id", Operator::IsNotNull)
        .order_by("username", Direction::Asc)
        .build()
});

fn bind(query: &PreparedQuery, operands: Vec<Operand>) -> RepoResult<Specification<MemberField>> {
    let query = Lazy::force(query).as_ref().map_err(|err| RepoError::Validation(err.clone()))?;
    Ok(query.bind(operands)?)
}

impl SqliteRepository<'_, Member> {
    /// Members named `username` who are strictly older than `age`.
    pub fn find_by_username_and_age_greater_than(
        &self,
        username: &str,
        age: i32,
    ) -> RepoResult<Vec<Member>> {
        let spec = bind(
            &BY_USERNAME_AND_AGE_GREATER_THAN,
            vec![Operand::value(username), Operand::value(age)],
        )?;
        self.find_all_matching(&spec)
    }

    /// Every member; a finder with no criteria.
    pub fn find_hello_by(&self) -> RepoResult<Vec<Member>> {
        self.find_all()
    }

    pub fn find_by_username(&self, username: &str) -> RepoResult<Vec<Member>> {
        let spec = bind(&BY_USERNAME, vec![Operand::value(username)])?;
        self.find_all_matching(&spec)
    }

    pub fn find_user(&self, username: &str, age: i32) -> RepoResult<Vec<Member>> {
        let spec = bind(
            &BY_USERNAME_AND_AGE,
            vec![Operand::value(username), Operand::value(age)],
        )?;
        self.find_all_matching(&spec)
    }

    /// Every username, in id order.
    pub fn find_username_list(&self) -> RepoResult<Vec<String>> {
        let rows: Vec<UsernameOnly> =
            self.find_projected(&Specification::All, &Sort::unsorted())?;
        Ok(rows.into_iter().map(|row| row.username).collect())
    }

    /// Members that belong to a team, with the team name.
    pub fn find_member_dto(&self) -> RepoResult<Vec<MemberDto>> {
        let spec = bind(&WITH_TEAM, Vec::new())?;
        let sort = Lazy::force(&WITH_TEAM)
            .as_ref()
            .map(|query| query.sort().clone())
            .unwrap_or_default();
        self.find_projected(&spec, &sort)
    }

    pub fn find_by_names<I, S>(&self, names: I) -> RepoResult<Vec<Member>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = Operand::list(names.into_iter().map(|name| name.as_ref().to_string()));
        let spec = bind(&BY_USERNAME_IN, vec![names])?;
        self.find_all_matching(&spec)
    }

    pub fn find_list_by_username(&self, username: &str) -> RepoResult<Vec<Member>> {
        self.find_by_username(username)
    }

    /// Mandatory single member named `username`.
    pub fn find_member_by_username(&self, username: &str) -> RepoResult<Member> {
        let spec = bind(&BY_USERNAME, vec![Operand::value(username)])?;
        self.get_one(&spec, "username")
    }

    pub fn find_optional_by_username(&self, username: &str) -> RepoResult<Option<Member>> {
        let spec = bind(&BY_USERNAME, vec![Operand::value(username)])?;
        self.find_one(&spec)
    }

    /// Page of members aged `age`, with the total count.
    pub fn find_by_age(
        &self,
        age: i32,
        request: &PageRequest<MemberField>,
    ) -> RepoResult<Page<Member>> {
        let spec = bind(&BY_AGE, vec![Operand::value(age)])?;
        self.find_page(&spec, request)
    }

    /// Slice of members aged `age`; skips the count query.
    pub fn get_by_age(
        &self,
        age: i32,
        request: &PageRequest<MemberField>,
    ) -> RepoResult<Slice<Member>> {
        let spec = bind(&BY_AGE, vec![Operand::value(age)])?;
        self.find_slice(&spec, request)
    }

    /// `age = age + 1` for every member aged `min_age` or older.
    pub fn bulk_age_plus(&self, min_age: i32) -> RepoResult<usize> {
        let spec = Specification::condition(
            MemberField::Age,
            Operator::GreaterThanEqual,
            Operand::value(min_age),
        )?;
        let affected = self.update_where(spec, vec![Assignment::add(MemberField::Age, 1)?])?;
        debug!("event=bulk_age_plus module=repo status=ok affected={affected}");
        Ok(affected)
    }

    /// Every member with its team, read in one join.
    pub fn find_all_with_team(&self) -> RepoResult<Vec<MemberWithTeam>> {
        self.find_projected(&Specification::All, &Sort::unsorted())
    }

    /// Members named `username` with their team, read in one join.
    pub fn find_with_team_by_username(&self, username: &str) -> RepoResult<Vec<MemberWithTeam>> {
        let spec = bind(&BY_USERNAME, vec![Operand::value(username)])?;
        self.find_projected(&spec, &Sort::unsorted())
    }

    /// Members matching `spec` with their team; the spec may use `team_name`.
    pub fn find_with_team_matching(
        &self,
        spec: &Specification<MemberField>,
    ) -> RepoResult<Vec<MemberWithTeam>> {
        self.find_projected(spec, &Sort::unsorted())
    }

    /// Members named `username`, locked exclusively until the unit ends.
    pub fn find_lock_by_username(&self, username: &str) -> RepoResult<Vec<Member>> {
        let spec = bind(&BY_USERNAME, vec![Operand::value(username)])?;
        self.find_locked(&spec, LockMode::PessimisticWrite)
    }

    pub fn find_projections_by_username(&self, username: &str) -> RepoResult<Vec<UsernameOnly>> {
        let spec = bind(&BY_USERNAME, vec![Operand::value(username)])?;
        self.find_projected(&spec, &Sort::unsorted())
    }

    /// Page of member id, username and (optional) team name.
    pub fn find_projection_page(
        &self,
        request: &PageRequest<MemberField>,
    ) -> RepoResult<Page<MemberProjection>> {
        self.find_projected_page(&Specification::All, request)
    }
}
