//! Reusable member specifications.

use crate::model::MemberField;
use crate::query::{Operand, Operator, Specification, Value};

pub struct MemberSpec;

impl MemberSpec {
    pub fn username(username: &str) -> Specification<MemberField> {
        Specification::leaf_unchecked(
            MemberField::Username,
            Operator::Equals,
            Operand::Single(Value::from(username)),
        )
    }

    /// Members of the team named `team_name`; no filter when absent or empty.
    ///
    /// Members without a team never match a non-empty name.
    pub fn team_name(team_name: Option<&str>) -> Specification<MemberField> {
        match team_name {
            Some(name) if !name.is_empty() => Specification::leaf_unchecked(
                MemberField::TeamName,
                Operator::Equals,
                Operand::Single(Value::from(name)),
            ),
            _ => Specification::All,
        }
    }

    pub fn age_at_least(age: i32) -> Specification<MemberField> {
        Specification::leaf_unchecked(
            MemberField::Age,
            Operator::GreaterThanEqual,
            Operand::Single(Value::from(age)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Member, MemberWithTeam, Team, TeamId};

    fn row(username: &str, team: Option<&str>) -> MemberWithTeam {
        MemberWithTeam {
            member: Member::new(username),
            team: team.map(|name| Team {
                id: Some(TeamId::new()),
                name: name.to_string(),
                version: 0,
            }),
        }
    }

    #[test]
    fn empty_team_name_is_no_filter() {
        assert!(MemberSpec::team_name(None).is_all());
        assert!(MemberSpec::team_name(Some("")).is_all());
    }

    #[test]
    fn username_and_team_name_compose() {
        let spec = MemberSpec::username("m1").and(MemberSpec::team_name(Some("teamA")));

        assert!(spec.matches(&row("m1", Some("teamA"))));
        assert!(!spec.matches(&row("m2", Some("teamA"))));
        assert!(!spec.matches(&row("m1", None)));
        assert!(spec.validate().is_ok());
    }
}
