//! Storage engine contract consumed by the unit of work.
//!
//! # Responsibility
//! - Execute specifications, windows and bulk updates against storage.
//! - Own transaction boundaries and row locks of one unit of work.
//!
//! # Invariants
//! - Engines never validate query intent; callers validate before executing.
//! - Locks acquired through an engine are released by `commit`, `rollback`
//!   or drop of that engine.
//!
//! # See also
//! - `uow` for the identity map and write-behind queue layered on top.

pub mod lock;
pub mod mapping;
mod sqlite;

pub use lock::{LockManager, LockMode};
pub use mapping::{Projection, SqlEntity};
pub use sqlite::{CancelHandle, SqliteEngine};

use crate::error::RepoResult;
use crate::query::{BulkUpdate, Sort, Specification};
use std::time::Duration;

/// Offset/limit window of a query; `limit: None` reads to the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Window {
    pub offset: u64,
    pub limit: Option<u64>,
}

impl Window {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(offset: u64, limit: u64) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// New row stored with version 0.
    Inserted,
    Updated { version: i64 },
}

impl WriteOutcome {
    pub fn version(self) -> i64 {
        match self {
            Self::Inserted => 0,
            Self::Updated { version } => version,
        }
    }
}

/// Version precondition of one [`StorageEngine::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    /// Overwrite whatever is stored.
    Unchecked,
    /// A stored row must carry this version; a missing row is inserted.
    IfPresent(i64),
    /// The row must still exist and carry this version.
    Existing(i64),
}

impl VersionCheck {
    pub fn expected(self) -> Option<i64> {
        match self {
            Self::Unchecked => None,
            Self::IfPresent(version) | Self::Existing(version) => Some(version),
        }
    }
}

/// Result of a bulk update: row count and the ids it touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkOutcome<I> {
    pub affected: usize,
    pub ids: Vec<I>,
}

/// Transaction scope of one unit of work.
///
/// The first read pins a snapshot that later reads share; the first write
/// replaces it with the write transaction, which sees the latest committed
/// state and keeps it for the rest of the unit.
pub trait StorageEngine {
    /// Opens the write transaction unless one is already open.
    fn begin_transaction(&self) -> RepoResult<()>;

    /// Moves later reads to the latest committed state.
    ///
    /// A no-op inside the write transaction, which already observes it.
    fn refresh_snapshot(&self) -> RepoResult<()>;

    fn commit(&self) -> RepoResult<()>;

    fn rollback(&self) -> RepoResult<()>;

    /// Whether the write transaction is open.
    fn in_transaction(&self) -> bool;

    fn execute_query<E, P>(
        &self,
        spec: &Specification<E::Field>,
        sort: &Sort<E::Field>,
        window: Window,
    ) -> RepoResult<Vec<P>>
    where
        E: SqlEntity,
        P: Projection<E>;

    fn count<E: SqlEntity>(&self, spec: &Specification<E::Field>) -> RepoResult<u64>;

    /// Stored version of `id`, `None` when no such row exists.
    fn stored_version<E: SqlEntity>(&self, id: E::Id) -> RepoResult<Option<i64>>;

    /// Ids of matching rows, ordered by id.
    fn select_ids<E: SqlEntity>(&self, spec: &Specification<E::Field>) -> RepoResult<Vec<E::Id>>;

    fn acquire_lock<E: SqlEntity>(
        &self,
        ids: &[E::Id],
        mode: LockMode,
        timeout: Duration,
    ) -> RepoResult<()>;

    /// Applies `update` in one statement inside the write transaction.
    ///
    /// Affected rows get their version bumped and are locked exclusively.
    fn execute_bulk_update<E: SqlEntity>(
        &self,
        update: &BulkUpdate<E::Field>,
    ) -> RepoResult<BulkOutcome<E::Id>>;

    /// Updates the row of `entity` or inserts it when absent, subject to
    /// `check`; a failed check is [`crate::error::RepoError::Conflict`].
    fn upsert<E: SqlEntity>(&self, entity: &E, check: VersionCheck) -> RepoResult<WriteOutcome>;

    /// Returns whether a row was removed.
    fn delete<E: SqlEntity>(&self, id: E::Id) -> RepoResult<bool>;
}
