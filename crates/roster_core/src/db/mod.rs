//! SQLite storage bootstrap and the shared database handle.
//!
//! # Responsibility
//! - Open and configure SQLite connections for roster.
//! - Apply schema migrations in deterministic order.
//! - Hand out one connection per unit of work.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - No unit of work starts before migrations succeed.
//! - Every unit of work of one [`Database`] shares one lock table.

use crate::config::StoreConfig;
use crate::engine::{LockManager, SqliteEngine};
use crate::error::RepoResult;
use crate::uow::UnitOfWork;
use log::warn;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use thiserror::Error;

pub mod migrations;
mod open;

pub use open::DbTarget;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    #[error("failed to create scratch database directory: {0}")]
    Scratch(#[from] std::io::Error),
}

/// Shared handle to one roster database.
///
/// Cheap to share behind an `Arc`; every [`Database::begin`] opens a fresh
/// connection owned by the returned [`UnitOfWork`].
pub struct Database {
    target: DbTarget,
    config: Arc<StoreConfig>,
    locks: Arc<LockManager>,
    /// Removes a scratch database once the handle is dropped.
    _scratch: Option<TempDir>,
}

impl Database {
    /// Opens (creating if needed) a database file with default settings.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    pub fn open_with_config(path: impl AsRef<Path>, config: StoreConfig) -> DbResult<Self> {
        let target = DbTarget::File(PathBuf::from(path.as_ref()));
        drop(open::open_connection(&target, &config)?);
        Ok(Self::from_parts(target, config, None))
    }

    /// Opens a private throwaway database; it lives as long as this handle.
    ///
    /// Backed by a WAL file in a temporary directory rather than SQLite's
    /// shared cache, whose table locks fail readers instead of giving each
    /// unit of work its own snapshot.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::open_in_memory_with_config(StoreConfig::default())
    }

    pub fn open_in_memory_with_config(config: StoreConfig) -> DbResult<Self> {
        let dir = tempfile::Builder::new().prefix("roster-").tempdir()?;
        let target = DbTarget::Scratch(dir.path().join("roster.db"));
        drop(open::open_connection(&target, &config)?);
        Ok(Self::from_parts(target, config, Some(dir)))
    }

    fn from_parts(target: DbTarget, config: StoreConfig, scratch: Option<TempDir>) -> Self {
        Self {
            target,
            config: Arc::new(config),
            locks: Arc::new(LockManager::new()),
            _scratch: scratch,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Current `PRAGMA user_version` of the database.
    pub fn schema_version(&self) -> DbResult<u32> {
        let conn = open::connect(&self.target, &self.config)?;
        let version = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        Ok(version)
    }

    /// Starts a unit of work on a dedicated connection.
    pub fn begin(&self) -> RepoResult<UnitOfWork> {
        let conn = open::connect(&self.target, &self.config)?;
        let engine = SqliteEngine::new(conn, Arc::clone(&self.locks), Arc::clone(&self.config));
        Ok(UnitOfWork::new(engine, Arc::clone(&self.config)))
    }

    /// Runs `work` in a unit of work: commits on `Ok`, rolls back on `Err`.
    pub fn transaction<T>(&self, work: impl FnOnce(&UnitOfWork) -> RepoResult<T>) -> RepoResult<T> {
        let uow = self.begin()?;
        match work(&uow) {
            Ok(value) => {
                uow.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = uow.rollback() {
                    warn!("event=uow_rollback module=db status=error error={rollback_err}");
                }
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("target", &self.target)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
