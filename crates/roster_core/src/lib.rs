//! Data-access layer for members and teams.
//! This crate owns the entity invariants, query model and unit-of-work rules.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod uow;

pub use config::{BulkCachePolicy, ConcurrencyMode, ConfigError, StoreConfig, TeamDeletePolicy};
pub use db::{Database, DbError};
pub use engine::{CancelHandle, LockMode};
pub use error::{RepoError, RepoResult, ValidationError};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::{
    Entity, Member, MemberDto, MemberField, MemberId, MemberProjection, MemberWithTeam, Team,
    TeamField, TeamId, TeamWithMembers, UsernameOnly,
};
pub use query::{
    Assignment, BulkUpdate, DerivedQuery, Direction, Example, ExampleMatcher, MemberProbe,
    Operand, Operator, Page, PageRequest, Slice, Sort, Specification, StringMatcher, Value,
};
pub use repo::{
    MemberRepository, MemberSpec, Repository, SpecificationExecutor, SqliteRepository,
    TeamRepository,
};
pub use uow::UnitOfWork;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
