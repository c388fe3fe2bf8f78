//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open SQLite connections to a database file or a scratch file.
//! - Configure connection pragmas required by core behavior.
//! - Trigger schema migrations once, when the database handle is created.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON` and `case_sensitive_like=ON`.
//! - The busy timeout equals the configured lock timeout.
//! - Scratch databases always run in WAL mode.

use super::migrations::apply_migrations;
use super::DbResult;
use crate::config::StoreConfig;
use log::{debug, error, info};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Where a [`super::Database`] keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbTarget {
    File(PathBuf),
    /// Private file removed together with its [`super::Database`].
    Scratch(PathBuf),
}

impl DbTarget {
    fn mode(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Scratch(_) => "scratch",
        }
    }

    fn path(&self) -> &Path {
        match self {
            Self::File(path) | Self::Scratch(path) => path,
        }
    }

    fn wants_wal(&self, config: &StoreConfig) -> bool {
        match self {
            Self::File(_) => config.journal_wal,
            Self::Scratch(_) => true,
        }
    }
}

/// Opens the first connection of a database and applies pending migrations.
///
/// # Side effects
/// - Switches file databases to WAL journaling when configured.
/// - Emits `db_open` logging events with duration and status.
pub(crate) fn open_connection(target: &DbTarget, config: &StoreConfig) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = target.mode();
    info!("event=db_open module=db status=start mode={mode}");

    let result = connect(target, config).and_then(|mut conn| {
        if target.wants_wal(config) {
            let journal: String =
                conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
            debug!("event=db_open module=db status=progress journal_mode={journal}");
        }
        let outcome = apply_migrations(&mut conn)?;
        debug!(
            "event=db_open module=db status=progress schema_from={} schema_to={}",
            outcome.from, outcome.to
        );
        Ok(conn)
    });

    match result {
        Ok(conn) => {
            info!(
                "event=db_open module=db status=ok mode={mode} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} \
                 error_code=db_bootstrap_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

/// Opens one more connection to an already migrated database.
pub(crate) fn connect(target: &DbTarget, config: &StoreConfig) -> DbResult<Connection> {
    let conn = Connection::open(target.path())?;
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA case_sensitive_like = ON;")?;
    conn.busy_timeout(config.lock_timeout())?;
    Ok(conn)
}
