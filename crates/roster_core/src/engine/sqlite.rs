//! SQLite implementation of [`StorageEngine`].
//!
//! # Invariants
//! - The first read opens a deferred transaction, so every read until the
//!   first write shares one WAL snapshot of committed data.
//! - The write transaction is `BEGIN IMMEDIATE`, so the SQLite writer lock
//!   is taken up front and later statements never fail on lock upgrade.
//!   A pending read snapshot is released first; WAL cannot upgrade a stale one.
//! - Row locks are requested before the SQLite writer lock.

use super::lock::{LockKey, LockManager, LockMode, LockOwner};
use super::mapping::{uuid_at, Projection, SqlEntity};
use super::{BulkOutcome, StorageEngine, VersionCheck, Window, WriteOutcome};
use crate::config::StoreConfig;
use crate::error::{RepoError, RepoResult};
use crate::query::field::EntityField;
use crate::query::sql::{order_clause, where_clause};
use crate::query::{Assignment, BulkUpdate, Sort, Specification};
use log::{debug, error};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, InterruptHandle, OptionalExtension, Row};
use std::cell::Cell;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Interrupts the statement currently running on one unit of work.
///
/// Safe to call from any thread; a call while nothing runs is a no-op.
pub struct CancelHandle(InterruptHandle);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.interrupt();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Idle,
    Read,
    Write,
}

pub struct SqliteEngine {
    conn: Connection,
    locks: Arc<LockManager>,
    owner: LockOwner,
    config: Arc<StoreConfig>,
    writing: Cell<bool>,
}

impl SqliteEngine {
    pub(crate) fn new(conn: Connection, locks: Arc<LockManager>, config: Arc<StoreConfig>) -> Self {
        let owner = locks.register_owner();
        Self {
            conn,
            locks,
            owner,
            config,
            writing: Cell::new(false),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.conn.get_interrupt_handle())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Derived from the connection, so transactions SQLite rolled back on
    /// its own read as `Idle`.
    fn tx_state(&self) -> TxState {
        if self.conn.is_autocommit() {
            TxState::Idle
        } else if self.writing.get() {
            TxState::Write
        } else {
            TxState::Read
        }
    }

    /// Opens the read snapshot shared by every read until the first write.
    fn ensure_snapshot(&self) -> RepoResult<()> {
        if self.tx_state() == TxState::Idle {
            self.writing.set(false);
            self.conn.execute_batch("BEGIN DEFERRED;")?;
        }
        Ok(())
    }

    fn end_snapshot(&self) -> RepoResult<()> {
        if self.tx_state() == TxState::Read {
            self.conn.execute_batch("COMMIT;")?;
        }
        Ok(())
    }

    fn query_map<T>(
        &self,
        sql: &str,
        params: Vec<SqlValue>,
        mut map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> RepoResult<Vec<T>> {
        self.ensure_snapshot()?;
        let mut stmt = self.conn.prepare_cached(sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(map(row)?);
        }
        Ok(out)
    }

    fn finish(&self, statement: &str, event: &str) -> RepoResult<()> {
        let result = if self.tx_state() == TxState::Idle {
            Ok(())
        } else {
            self.conn.execute_batch(statement)
        };
        self.writing.set(false);
        self.locks.release_all(self.owner);
        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(
                    "event={event} module=engine status=error error_code=sqlite_failed error={err}"
                );
                Err(err.into())
            }
        }
    }
}

impl Drop for SqliteEngine {
    fn drop(&mut self) {
        // The connection rolls back any open transaction when it closes.
        self.locks.release_all(self.owner);
    }
}

impl StorageEngine for SqliteEngine {
    fn begin_transaction(&self) -> RepoResult<()> {
        if self.in_transaction() {
            return Ok(());
        }
        let started_at = Instant::now();
        self.end_snapshot()?;
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        self.writing.set(true);
        debug!(
            "event=tx_begin module=engine status=ok waited_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    fn commit(&self) -> RepoResult<()> {
        self.finish("COMMIT;", "tx_commit")
    }

    fn rollback(&self) -> RepoResult<()> {
        self.finish("ROLLBACK;", "tx_rollback")
    }

    fn refresh_snapshot(&self) -> RepoResult<()> {
        self.end_snapshot()?;
        self.ensure_snapshot()
    }

    fn in_transaction(&self) -> bool {
        self.tx_state() == TxState::Write
    }

    fn execute_query<E, P>(
        &self,
        spec: &Specification<E::Field>,
        sort: &Sort<E::Field>,
        window: Window,
    ) -> RepoResult<Vec<P>>
    where
        E: SqlEntity,
        P: Projection<E>,
    {
        let started_at = Instant::now();
        let clause = where_clause(spec);
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {} {}",
            P::COLUMNS_SQL,
            E::FROM_SQL,
            clause.sql,
            order_clause(sort)
        );
        let mut params = clause.params;
        match window.limit {
            Some(limit) => {
                sql.push_str(" LIMIT ? OFFSET ?");
                params.push(SqlValue::Integer(to_sql_int(limit)));
                params.push(SqlValue::Integer(to_sql_int(window.offset)));
            }
            None if window.offset > 0 => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                params.push(SqlValue::Integer(to_sql_int(window.offset)));
            }
            None => {}
        }

        let rows = self.query_map(&sql, params, P::from_row)?;
        debug!(
            "event=engine_query module=engine status=ok entity={} rows={} duration_ms={}",
            E::KIND,
            rows.len(),
            started_at.elapsed().as_millis()
        );
        Ok(rows)
    }

    fn count<E: SqlEntity>(&self, spec: &Specification<E::Field>) -> RepoResult<u64> {
        self.ensure_snapshot()?;
        let clause = where_clause(spec);
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", E::FROM_SQL, clause.sql);
        let count: i64 = self
            .conn
            .prepare_cached(&sql)?
            .query_row(params_from_iter(clause.params), |row| row.get(0))?;
        u64::try_from(count).map_err(|_| RepoError::InvalidData(format!("negative count {count}")))
    }

    fn stored_version<E: SqlEntity>(&self, id: E::Id) -> RepoResult<Option<i64>> {
        self.ensure_snapshot()?;
        let version = self
            .conn
            .prepare_cached(&format!("SELECT version FROM {} WHERE id = ?", E::TABLE))?
            .query_row([id.to_string()], |row| row.get(0))
            .optional()?;
        Ok(version)
    }

    fn select_ids<E: SqlEntity>(&self, spec: &Specification<E::Field>) -> RepoResult<Vec<E::Id>> {
        let id_column = <E::Field as EntityField>::ID.column();
        let clause = where_clause(spec);
        let sql = format!(
            "SELECT {id_column} FROM {} WHERE {} ORDER BY {id_column} ASC",
            E::FROM_SQL,
            clause.sql
        );
        self.query_map(&sql, clause.params, |row| uuid_at(row, 0).map(E::Id::from))
    }

    fn acquire_lock<E: SqlEntity>(
        &self,
        ids: &[E::Id],
        mode: LockMode,
        timeout: Duration,
    ) -> RepoResult<()> {
        let keys: Vec<LockKey> = ids
            .iter()
            .map(|id| LockKey {
                kind: E::KIND,
                id: (*id).into(),
            })
            .collect();
        self.locks.acquire(self.owner, &keys, mode, timeout)?;
        Ok(())
    }

    fn execute_bulk_update<E: SqlEntity>(
        &self,
        update: &BulkUpdate<E::Field>,
    ) -> RepoResult<BulkOutcome<E::Id>> {
        let started_at = Instant::now();
        let timeout = self.config.lock_timeout();

        let candidates = self.select_ids::<E>(update.spec())?;
        self.acquire_lock::<E>(&candidates, LockMode::PessimisticWrite, timeout)?;
        self.begin_transaction()?;
        // Rows may have started matching between the first select and BEGIN.
        let ids = self.select_ids::<E>(update.spec())?;
        self.acquire_lock::<E>(&ids, LockMode::PessimisticWrite, timeout)?;

        let (sets, mut params): (Vec<String>, Vec<SqlValue>) =
            update.assignments().iter().map(Assignment::to_sql).unzip();
        let clause = where_clause(update.spec());
        params.extend(clause.params);
        let sql = format!(
            "UPDATE {table} SET {sets}, version = version + 1 \
             WHERE id IN (SELECT {id_column} FROM {from} WHERE {predicate})",
            table = E::TABLE,
            sets = sets.join(", "),
            id_column = <E::Field as EntityField>::ID.column(),
            from = E::FROM_SQL,
            predicate = clause.sql,
        );
        let affected = self.conn.execute(&sql, params_from_iter(params))?;

        debug!(
            "event=bulk_update module=engine status=ok entity={} affected={} duration_ms={}",
            E::KIND,
            affected,
            started_at.elapsed().as_millis()
        );
        Ok(BulkOutcome { affected, ids })
    }

    fn upsert<E: SqlEntity>(&self, entity: &E, check: VersionCheck) -> RepoResult<WriteOutcome> {
        let id = entity
            .id()
            .ok_or_else(|| RepoError::InvalidData(format!("{} has no id", E::KIND)))?;
        let id_text = id.to_string();

        let sets: Vec<String> = E::WRITE_COLUMNS
            .iter()
            .map(|column| format!("{column} = ?"))
            .collect();
        let mut params = entity.write_values();
        params.push(SqlValue::Text(id_text.clone()));
        let mut sql = format!(
            "UPDATE {} SET {}, version = version + 1 WHERE id = ?",
            E::TABLE,
            sets.join(", ")
        );
        let expected_version = check.expected();
        if let Some(expected) = expected_version {
            sql.push_str(" AND version = ?");
            params.push(SqlValue::Integer(expected));
        }
        sql.push_str(" RETURNING version");

        let updated: Option<i64> = self
            .conn
            .prepare_cached(&sql)?
            .query_row(params_from_iter(params), |row| row.get(0))
            .optional()?;
        if let Some(version) = updated {
            return Ok(WriteOutcome::Updated { version });
        }

        let exists = self
            .conn
            .prepare_cached(&format!("SELECT 1 FROM {} WHERE id = ?", E::TABLE))?
            .query_row([id_text.as_str()], |_| Ok(()))
            .optional()?
            .is_some();
        // A row this unit saw must not come back after another unit deleted it.
        if exists || matches!(check, VersionCheck::Existing(_)) {
            return Err(RepoError::Conflict {
                entity: E::KIND.as_str(),
                id: id_text,
                expected_version: expected_version.unwrap_or_default(),
            });
        }

        let placeholders = vec!["?"; E::WRITE_COLUMNS.len() + 1].join(", ");
        let sql = format!(
            "INSERT INTO {} (id, {}, version) VALUES ({placeholders}, 0)",
            E::TABLE,
            E::WRITE_COLUMNS.join(", ")
        );
        let mut params = vec![SqlValue::Text(id_text)];
        params.extend(entity.write_values());
        self.conn
            .prepare_cached(&sql)?
            .execute(params_from_iter(params))?;
        Ok(WriteOutcome::Inserted)
    }

    fn delete<E: SqlEntity>(&self, id: E::Id) -> RepoResult<bool> {
        let changed = self
            .conn
            .prepare_cached(&format!("DELETE FROM {} WHERE id = ?", E::TABLE))?
            .execute([id.to_string()])?;
        Ok(changed > 0)
    }
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
