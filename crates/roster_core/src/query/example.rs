//! Query by example.
//!
//! A probe lists the field values it wants matched; the matcher decides
//! which of them are ignored and how text values are compared. The result is
//! an ordinary conjunction [`Specification`].

use super::field::{EntityField, Value};
use super::spec::{Operand, Operator, Specification};
use crate::error::ValidationError;
use crate::model::{Member, MemberField, Team, TeamField};

/// Supplies the populated fields of an example object.
pub trait Probe<F> {
    fn probe_values(&self) -> Vec<(F, Value)>;
}

/// How text values of the probe are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringMatcher {
    #[default]
    Exact,
    StartsWith,
    Contains,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExampleMatcher {
    ignore_paths: Vec<String>,
    string_matcher: StringMatcher,
}

impl ExampleMatcher {
    pub fn matching() -> Self {
        Self::default()
    }

    pub fn with_ignore_paths(mut self, paths: &[&str]) -> Self {
        self.ignore_paths
            .extend(paths.iter().map(|path| (*path).to_string()));
        self
    }

    pub fn with_string_matcher(mut self, matcher: StringMatcher) -> Self {
        self.string_matcher = matcher;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example<F> {
    values: Vec<(F, Value)>,
    matcher: ExampleMatcher,
}

impl<F: EntityField> Example<F> {
    pub fn of(probe: &impl Probe<F>) -> Self {
        Self {
            values: probe.probe_values(),
            matcher: ExampleMatcher::default(),
        }
    }

    pub fn with_matcher(mut self, matcher: ExampleMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn to_specification(&self) -> Result<Specification<F>, ValidationError> {
        let ignored = self
            .matcher
            .ignore_paths
            .iter()
            .map(|path| F::parse(path))
            .collect::<Result<Vec<_>, _>>()?;

        let mut spec = Specification::All;
        for (field, value) in &self.values {
            if ignored.contains(field) {
                continue;
            }
            let op = match (value, self.matcher.string_matcher) {
                (Value::Text(_), StringMatcher::StartsWith) => Operator::StartingWith,
                (Value::Text(_), StringMatcher::Contains) => Operator::Containing,
                _ => Operator::Equals,
            };
            spec = spec.and(Specification::condition(
                *field,
                op,
                Operand::Single(value.clone()),
            )?);
        }
        Ok(spec)
    }
}

impl Probe<MemberField> for Member {
    /// Username and age are always probed; the team only when set.
    fn probe_values(&self) -> Vec<(MemberField, Value)> {
        let mut values = vec![
            (MemberField::Username, Value::from(self.username.as_str())),
            (MemberField::Age, Value::from(self.age)),
        ];
        if let Some(team_id) = self.team_id {
            values.push((MemberField::TeamId, Value::from(team_id)));
        }
        values
    }
}

/// Sparse member probe that can also match on the joined team name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberProbe {
    pub username: Option<String>,
    pub age: Option<i32>,
    pub team_name: Option<String>,
}

impl MemberProbe {
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn age(mut self, age: i32) -> Self {
        self.age = Some(age);
        self
    }

    pub fn team_name(mut self, team_name: impl Into<String>) -> Self {
        self.team_name = Some(team_name.into());
        self
    }
}

impl Probe<MemberField> for MemberProbe {
    fn probe_values(&self) -> Vec<(MemberField, Value)> {
        let mut values = Vec::new();
        if let Some(username) = &self.username {
            values.push((MemberField::Username, Value::from(username.as_str())));
        }
        if let Some(age) = self.age {
            values.push((MemberField::Age, Value::from(age)));
        }
        if let Some(team_name) = &self.team_name {
            values.push((MemberField::TeamName, Value::from(team_name.as_str())));
        }
        values
    }
}

impl Probe<TeamField> for Team {
    fn probe_values(&self) -> Vec<(TeamField, Value)> {
        vec![(TeamField::Name, Value::from(self.name.as_str()))]
    }
}
