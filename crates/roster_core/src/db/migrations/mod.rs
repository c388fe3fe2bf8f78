//! SQLite migration registry and executor.
//!
//! # Responsibility
//! - Register the roster schema steps in strictly increasing order.
//! - Bring a database to the latest schema under the SQLite writer lock.
//!
//! # Invariants
//! - `version` values must remain monotonic.
//! - Applied migration version is mirrored to `PRAGMA user_version`.
//! - Several handles opening one file concurrently apply each step once:
//!   the version is re-read after the writer lock is taken.
//! - Foreign keys still hold after the last applied step.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::{Connection, TransactionBehavior};

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "teams_members",
        sql: include_str!("0001_teams_members.sql"),
    },
    Migration {
        version: 2,
        name: "member_indexes",
        sql: include_str!("0002_member_indexes.sql"),
    },
];

/// Schema versions before and after [`apply_migrations`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub from: u32,
    pub to: u32,
}

impl MigrationOutcome {
    pub fn applied(self) -> bool {
        self.from != self.to
    }
}

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Applies all pending migrations on the provided connection.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<MigrationOutcome> {
    let latest = latest_version();
    let seen = user_version(conn)?;
    check_supported(seen, latest)?;
    if seen == latest {
        return Ok(MigrationOutcome {
            from: seen,
            to: seen,
        });
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    // Another handle may have migrated while we waited for the writer lock.
    let from = user_version(&tx)?;
    check_supported(from, latest)?;
    for migration in pending(from) {
        tx.execute_batch(migration.sql)?;
        tx.pragma_update(None, "user_version", migration.version)?;
        info!(
            "event=db_migrate module=db status=ok version={} name={}",
            migration.version, migration.name
        );
    }
    let violations: i64 =
        tx.query_row("SELECT COUNT(*) FROM pragma_foreign_key_check", [], |row| row.get(0))?;
    if violations > 0 {
        return Err(DbError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY),
            Some(format!("{violations} foreign key violation(s) after migration")),
        )));
    }
    tx.commit()?;

    Ok(MigrationOutcome { from, to: latest })
}

fn pending(from: u32) -> impl Iterator<Item = &'static Migration> {
    MIGRATIONS
        .iter()
        .filter(move |migration| migration.version > from)
}

fn check_supported(db_version: u32, latest_supported: u32) -> DbResult<()> {
    if db_version > latest_supported {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        });
    }
    Ok(())
}

fn user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::{apply_migrations, latest_version, pending, user_version, MIGRATIONS};
    use rusqlite::Connection;

    #[test]
    fn registry_versions_are_strictly_increasing_from_one() {
        assert_eq!(MIGRATIONS[0].version, 1);
        for pair in MIGRATIONS.windows(2) {
            assert_eq!(pair[1].version, pair[0].version + 1, "{}", pair[1].name);
        }
    }

    #[test]
    fn fresh_database_is_brought_to_latest() {
        let mut conn = Connection::open_in_memory().unwrap();
        let outcome = apply_migrations(&mut conn).unwrap();

        assert_eq!(outcome.from, 0);
        assert_eq!(outcome.to, latest_version());
        assert!(outcome.applied());
        assert_eq!(user_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn only_pending_steps_run_on_a_partially_migrated_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(MIGRATIONS[0].sql).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();

        assert_eq!(pending(1).count(), MIGRATIONS.len() - 1);
        let outcome = apply_migrations(&mut conn).unwrap();
        assert_eq!(outcome.from, 1);
        assert_eq!(outcome.to, latest_version());

        let again = apply_migrations(&mut conn).unwrap();
        assert!(!again.applied());
    }
}
