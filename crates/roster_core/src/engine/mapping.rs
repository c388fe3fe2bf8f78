//! Row mapping between SQLite and entities or read models.
//!
//! # Invariants
//! - Ids are stored as hyphenated lowercase UUID text.
//! - Column order in `COLUMNS_SQL` matches the indexes read in `from_row`.

use crate::model::{
    Entity, Member, MemberDto, MemberId, MemberProjection, MemberWithTeam, Team, TeamId,
    UsernameOnly,
};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::Row;
use uuid::Uuid;

/// A shape that can be selected from the `FROM_SQL` of entity `E`.
pub trait Projection<E>: Sized {
    const COLUMNS_SQL: &'static str;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Table metadata for an entity persisted by the SQLite engine.
pub trait SqlEntity: Entity + Projection<Self> {
    const TABLE: &'static str;
    /// Source relation, with the same aliases used by the field catalog.
    const FROM_SQL: &'static str;
    /// Writable columns, in the order produced by [`SqlEntity::write_values`].
    const WRITE_COLUMNS: &'static [&'static str];

    fn write_values(&self) -> Vec<SqlValue>;
}

const MEMBER_COLUMNS: &str = "m.id, m.username, m.age, m.team_id, m.version";

impl Projection<Member> for Member {
    const COLUMNS_SQL: &'static str = MEMBER_COLUMNS;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(MemberId::from(uuid_at(row, 0)?)),
            username: row.get(1)?,
            age: row.get(2)?,
            team_id: opt_uuid_at(row, 3)?.map(TeamId::from),
            version: row.get(4)?,
        })
    }
}

impl SqlEntity for Member {
    const TABLE: &'static str = "members";
    const FROM_SQL: &'static str = "members m LEFT JOIN teams t ON t.id = m.team_id";
    const WRITE_COLUMNS: &'static [&'static str] = &["username", "age", "team_id"];

    fn write_values(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::Text(self.username.clone()),
            SqlValue::Integer(i64::from(self.age)),
            self.team_id
                .map_or(SqlValue::Null, |id| SqlValue::Text(id.to_string())),
        ]
    }
}

impl Projection<Team> for Team {
    const COLUMNS_SQL: &'static str = "t.id, t.name, t.version";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(TeamId::from(uuid_at(row, 0)?)),
            name: row.get(1)?,
            version: row.get(2)?,
        })
    }
}

impl SqlEntity for Team {
    const TABLE: &'static str = "teams";
    const FROM_SQL: &'static str = "teams t";
    const WRITE_COLUMNS: &'static [&'static str] = &["name"];

    fn write_values(&self) -> Vec<SqlValue> {
        vec![SqlValue::Text(self.name.clone())]
    }
}

impl Projection<Member> for MemberWithTeam {
    const COLUMNS_SQL: &'static str =
        "m.id, m.username, m.age, m.team_id, m.version, t.id, t.name, t.version";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let member = <Member as Projection<Member>>::from_row(row)?;
        let team = match opt_uuid_at(row, 5)? {
            Some(team_id) => Some(Team {
                id: Some(TeamId::from(team_id)),
                name: row.get(6)?,
                version: row.get(7)?,
            }),
            None => None,
        };
        Ok(Self { member, team })
    }
}

impl Projection<Member> for UsernameOnly {
    const COLUMNS_SQL: &'static str = "m.username";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            username: row.get(0)?,
        })
    }
}

/// Callers must restrict the query to members with a team.
impl Projection<Member> for MemberDto {
    const COLUMNS_SQL: &'static str = "m.id, m.username, t.name";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: MemberId::from(uuid_at(row, 0)?),
            username: row.get(1)?,
            team_name: row.get(2)?,
        })
    }
}

impl Projection<Member> for MemberProjection {
    const COLUMNS_SQL: &'static str = "m.id, m.username, t.name";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: MemberId::from(uuid_at(row, 0)?),
            username: row.get(1)?,
            team_name: row.get(2)?,
        })
    }
}

pub(crate) fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let text: String = row.get(idx)?;
    parse_uuid(idx, &text)
}

pub(crate) fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|text| parse_uuid(idx, &text)).transpose()
}

fn parse_uuid(idx: usize, text: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(text)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}
