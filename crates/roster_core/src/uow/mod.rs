//! Unit of work: one transaction scope over one SQLite connection.
//!
//! # Responsibility
//! - Track loaded and saved entities in a per-unit identity map.
//! - Queue writes and flush them, in save order, inside one write transaction.
//! - Apply optimistic version checks and row locks to flushed writes.
//!
//! # Invariants
//! - Pending writes are flushed before any read that touches storage.
//! - Reads before the first write share one snapshot; after it, reads see the
//!   unit's own writes on top of the latest committed state.
//! - `save` returns the version the row carries once the write is flushed.
//! - A failed flush or bulk update rolls the whole unit back; every later
//!   call fails with [`RepoError::TransactionAborted`].
//! - Nothing written by a unit is visible to other units before `commit`.
//!
//! # See also
//! - `repo` for the typed repository surface built on top.

mod identity;

use crate::config::{BulkCachePolicy, ConcurrencyMode, StoreConfig, TeamDeletePolicy};
use crate::engine::{
    CancelHandle, LockMode, Projection, SqlEntity, SqliteEngine, StorageEngine, VersionCheck,
    Window,
};
use crate::error::{RepoError, RepoResult};
use crate::model::{Entity, EntityKind, Member, MemberField, MemberId, Record, Team, TeamId};
use crate::query::field::{EntityField, Value};
use crate::query::{Assignment, BulkUpdate, Operand, Operator, Sort, Specification};
use identity::{key_of, IdentityMap, RecordKey};
use log::{debug, info, warn};
use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone)]
enum PendingWrite {
    /// `base_version` is the version the caller's copy carried when first queued.
    Upsert {
        key: RecordKey,
        record: Record,
        base_version: i64,
    },
    Delete {
        key: RecordKey,
    },
}

impl PendingWrite {
    fn key(&self) -> RecordKey {
        match self {
            Self::Upsert { key, .. } | Self::Delete { key } => *key,
        }
    }
}

#[derive(Debug, Default)]
struct UowState {
    identity: IdentityMap,
    pending: Vec<PendingWrite>,
    flushed_writes: usize,
    aborted: bool,
}

/// One transaction scope.
///
/// Obtained from [`crate::db::Database::begin`]; end it with
/// [`UnitOfWork::commit`] or [`UnitOfWork::rollback`]. Dropping an open unit
/// rolls it back. A unit is `Send` but not `Sync`: hand it to another thread,
/// do not share it.
pub struct UnitOfWork {
    engine: SqliteEngine,
    config: Arc<StoreConfig>,
    state: RefCell<UowState>,
    started_at: Instant,
}

impl UnitOfWork {
    pub(crate) fn new(engine: SqliteEngine, config: Arc<StoreConfig>) -> Self {
        debug!("event=uow_begin module=uow status=ok");
        Self {
            engine,
            config,
            state: RefCell::new(UowState::default()),
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Handle that interrupts whatever statement this unit is running.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.engine.cancel_handle()
    }

    pub fn is_aborted(&self) -> bool {
        self.state.borrow().aborted
    }

    /// Whether `id` is currently tracked by the identity map.
    pub fn contains<E: Entity>(&self, id: E::Id) -> bool {
        self.state.borrow().identity.contains(&key_of::<E>(id))
    }

    pub fn tracked_count(&self) -> usize {
        self.state.borrow().identity.len()
    }

    pub fn pending_count(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Detaches every tracked entity. Queued writes stay queued.
    pub fn clear(&self) {
        let mut state = self.state.borrow_mut();
        let detached = state.identity.len();
        state.identity.clear();
        debug!("event=uow_clear module=uow status=ok detached={detached}");
    }

    /// Writes every queued change to storage inside the write transaction.
    pub fn flush(&self) -> RepoResult<()> {
        self.ensure_active()?;
        let pending = std::mem::take(&mut self.state.borrow_mut().pending);
        if pending.is_empty() {
            return Ok(());
        }

        let started_at = Instant::now();
        self.guarded(|| self.apply_writes(&pending))?;
        self.state.borrow_mut().flushed_writes += pending.len();
        debug!(
            "event=uow_flush module=uow status=ok writes={} duration_ms={}",
            pending.len(),
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Flushes and commits; every write of the unit becomes visible at once.
    pub fn commit(self) -> RepoResult<()> {
        self.ensure_active()?;
        self.flush()?;
        if let Err(err) = self.engine.commit() {
            if let Err(rollback_err) = self.engine.rollback() {
                warn!(
                    "event=uow_commit module=uow status=error error_code=rollback_failed \
                     error={rollback_err}"
                );
            }
            return Err(err);
        }
        info!(
            "event=uow_commit module=uow status=ok writes={} duration_ms={}",
            self.state.borrow().flushed_writes,
            self.started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Discards every flushed and queued write of the unit.
    pub fn rollback(self) -> RepoResult<()> {
        if self.is_aborted() {
            return Ok(());
        }
        self.engine.rollback()?;
        let state = self.state.borrow();
        info!(
            "event=uow_rollback module=uow status=ok discarded_writes={} duration_ms={}",
            state.flushed_writes + state.pending.len(),
            self.started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Validates `entity`, assigns its id when missing and queues the write.
    ///
    /// The returned copy carries the version the row will have once flushed.
    /// Under last-writer-wins that assumes no other unit writes it first.
    pub(crate) fn save<E: SqlEntity>(&self, mut entity: E) -> RepoResult<E> {
        self.ensure_active()?;
        entity.validate()?;
        let is_new = entity.id().is_none();
        let id = entity.ensure_id();
        let key = key_of::<E>(id);
        let base_version = entity.version();
        entity.set_version(self.version_after_write(key, &entity, is_new)?);

        let mut state = self.state.borrow_mut();
        state.identity.put(id, entity.clone());
        let record = entity.clone().into_record();
        let queued = state
            .pending
            .iter()
            .rposition(|write| write.key() == key)
            .and_then(|index| match &state.pending[index] {
                PendingWrite::Upsert { base_version, .. } => Some((index, *base_version)),
                PendingWrite::Delete { .. } => None,
            });
        let write = |base_version| PendingWrite::Upsert {
            key,
            record,
            base_version,
        };
        match queued {
            Some((index, first_base)) => state.pending[index] = write(first_base),
            None => state.pending.push(write(base_version)),
        }
        Ok(entity)
    }

    /// Tracked copy of `id`, loading and tracking it on a miss.
    pub(crate) fn find<E: SqlEntity>(&self, id: E::Id) -> RepoResult<Option<E>> {
        self.ensure_active()?;
        if let Some(tracked) = self.state.borrow().identity.get::<E>(id) {
            return Ok(Some(tracked));
        }
        let loaded = self.load_by_id::<E>(id)?;
        Ok(loaded.map(|entity| self.state.borrow_mut().identity.merge_loaded(entity)))
    }

    /// Current stored state of `id`; neither reads nor fills the identity map.
    pub(crate) fn find_uncached<E: SqlEntity>(&self, id: E::Id) -> RepoResult<Option<E>> {
        self.ensure_active()?;
        self.load_by_id::<E>(id)
    }

    /// Entities matching `spec`; already tracked ids come back as tracked.
    pub(crate) fn query<E: SqlEntity>(
        &self,
        spec: &Specification<E::Field>,
        sort: &Sort<E::Field>,
        window: Window,
    ) -> RepoResult<Vec<E>> {
        let rows = self.query_projection::<E, E>(spec, sort, window)?;
        let mut state = self.state.borrow_mut();
        Ok(rows
            .into_iter()
            .map(|row| state.identity.merge_loaded(row))
            .collect())
    }

    /// Untracked read model rows matching `spec`.
    pub(crate) fn query_projection<E, P>(
        &self,
        spec: &Specification<E::Field>,
        sort: &Sort<E::Field>,
        window: Window,
    ) -> RepoResult<Vec<P>>
    where
        E: SqlEntity,
        P: Projection<E>,
    {
        self.ensure_active()?;
        spec.validate()?;
        self.flush()?;
        self.engine.execute_query::<E, P>(spec, sort, window)
    }

    pub(crate) fn count<E: SqlEntity>(&self, spec: &Specification<E::Field>) -> RepoResult<u64> {
        self.ensure_active()?;
        spec.validate()?;
        self.flush()?;
        self.engine.count::<E>(spec)
    }

    /// Locks every matching row in `mode`, then returns their current state.
    ///
    /// Locks are held until the unit ends. Tracked copies are refreshed.
    pub(crate) fn query_locked<E: SqlEntity>(
        &self,
        spec: &Specification<E::Field>,
        sort: &Sort<E::Field>,
        mode: LockMode,
    ) -> RepoResult<Vec<E>> {
        self.ensure_active()?;
        spec.validate()?;
        self.flush()?;
        let timeout = self.config.lock_timeout();

        let candidates = self.engine.select_ids::<E>(spec)?;
        self.engine.acquire_lock::<E>(&candidates, mode, timeout)?;
        // Rows may have changed between our snapshot and the lock grant.
        self.engine.refresh_snapshot()?;
        let rows: Vec<E> = self.engine.execute_query::<E, E>(spec, sort, Window::all())?;

        let locked: HashSet<E::Id> = candidates.into_iter().collect();
        let late: Vec<E::Id> = rows
            .iter()
            .filter_map(|row| row.id())
            .filter(|id| !locked.contains(id))
            .collect();
        self.engine.acquire_lock::<E>(&late, mode, timeout)?;

        debug!(
            "event=locked_read module=uow status=ok entity={} mode={:?} rows={}",
            E::KIND,
            mode,
            rows.len()
        );
        let mut state = self.state.borrow_mut();
        Ok(rows
            .into_iter()
            .map(|row| state.identity.refresh(row))
            .collect())
    }

    /// Queues removal of `id`; fails with `NotFound` when no such row exists.
    pub(crate) fn delete<E: SqlEntity>(&self, id: E::Id) -> RepoResult<()> {
        self.ensure_active()?;
        self.flush()?;
        if self.engine.count::<E>(&id_spec::<E>(id))? == 0 {
            return Err(RepoError::not_found(E::KIND.as_str(), id));
        }

        let key = key_of::<E>(id);
        if E::KIND == EntityKind::Team {
            self.release_team_members(TeamId::from(key.1))?;
        }

        let mut state = self.state.borrow_mut();
        state.identity.evict(&key);
        state.pending.push(PendingWrite::Delete { key });
        Ok(())
    }

    /// Applies `update` to every matching row in one statement.
    pub(crate) fn bulk_update<E: SqlEntity>(
        &self,
        update: &BulkUpdate<E::Field>,
    ) -> RepoResult<usize> {
        self.ensure_active()?;
        update.spec().validate()?;
        self.flush()?;

        let started_at = Instant::now();
        let outcome = self.guarded(|| self.engine.execute_bulk_update::<E>(update))?;
        let policy = update
            .cache_policy()
            .unwrap_or(self.config.bulk_cache_policy);
        {
            let mut state = self.state.borrow_mut();
            match policy {
                BulkCachePolicy::Retain => {}
                BulkCachePolicy::EvictAffected => {
                    for id in &outcome.ids {
                        state.identity.evict(&key_of::<E>(*id));
                    }
                }
                BulkCachePolicy::ClearAll => state.identity.clear(),
            }
        }

        info!(
            "event=bulk_update module=uow status=ok entity={} affected={} cache_policy={:?} \
             duration_ms={}",
            E::KIND,
            outcome.affected,
            policy,
            started_at.elapsed().as_millis()
        );
        Ok(outcome.affected)
    }

    /// Version the row of `key` will carry once the queued write is flushed.
    fn version_after_write<E: SqlEntity>(
        &self,
        key: RecordKey,
        entity: &E,
        is_new: bool,
    ) -> RepoResult<i64> {
        {
            let state = self.state.borrow();
            match state.pending.iter().rev().find(|write| write.key() == key) {
                Some(PendingWrite::Upsert { record, .. }) => return Ok(record.version()),
                Some(PendingWrite::Delete { .. }) => return Ok(0),
                None => {}
            }
            if let Some(observed) = state.identity.observed_version(&key) {
                return Ok(observed + 1);
            }
        }
        if is_new {
            return Ok(0);
        }
        let stored = self.engine.stored_version::<E>(E::Id::from(key.1))?;
        Ok(match (stored, self.config.concurrency_for(E::KIND)) {
            (None, _) => 0,
            (Some(_), ConcurrencyMode::Optimistic) => entity.version() + 1,
            (Some(stored), ConcurrencyMode::LastWriterWins) => stored + 1,
        })
    }

    fn load_by_id<E: SqlEntity>(&self, id: E::Id) -> RepoResult<Option<E>> {
        self.flush()?;
        let mut rows = self.engine.execute_query::<E, E>(
            &id_spec::<E>(id),
            &Sort::unsorted(),
            Window::new(0, 1),
        )?;
        Ok(rows.pop())
    }

    /// Enforces the team delete policy for members still pointing at `team_id`.
    fn release_team_members(&self, team_id: TeamId) -> RepoResult<()> {
        let referencing = Specification::leaf_unchecked(
            MemberField::TeamId,
            Operator::Equals,
            Operand::Single(Value::from(team_id)),
        );
        match self.config.team_delete_policy {
            TeamDeletePolicy::Restrict => {
                let members = self.engine.count::<Member>(&referencing)?;
                if members > 0 {
                    return Err(RepoError::ConstraintViolation(format!(
                        "team {team_id} is still referenced by {members} member(s)"
                    )));
                }
                Ok(())
            }
            TeamDeletePolicy::DetachMembers => {
                let detach = BulkUpdate::new(
                    referencing,
                    vec![Assignment::set(MemberField::TeamId, Value::Null)?],
                )?;
                let outcome = self.guarded(|| self.engine.execute_bulk_update::<Member>(&detach))?;
                let mut state = self.state.borrow_mut();
                for id in &outcome.ids {
                    state.identity.evict(&key_of::<Member>(*id));
                }
                debug!(
                    "event=team_detach module=uow status=ok team_id={team_id} members={}",
                    outcome.affected
                );
                Ok(())
            }
        }
    }

    fn apply_writes(&self, pending: &[PendingWrite]) -> RepoResult<()> {
        let timeout = self.config.lock_timeout();
        let (members, teams): (Vec<RecordKey>, Vec<RecordKey>) = pending
            .iter()
            .map(PendingWrite::key)
            .partition(|(kind, _)| *kind == EntityKind::Member);
        let member_ids: Vec<MemberId> = members.iter().map(|(_, id)| MemberId::from(*id)).collect();
        let team_ids: Vec<TeamId> = teams.iter().map(|(_, id)| TeamId::from(*id)).collect();
        self.engine
            .acquire_lock::<Member>(&member_ids, LockMode::PessimisticWrite, timeout)?;
        self.engine
            .acquire_lock::<Team>(&team_ids, LockMode::PessimisticWrite, timeout)?;

        self.engine.begin_transaction()?;
        for write in pending {
            match write {
                PendingWrite::Upsert {
                    key,
                    record: Record::Member(member),
                    base_version,
                } => self.write_entity(*key, member, *base_version)?,
                PendingWrite::Upsert {
                    key,
                    record: Record::Team(team),
                    base_version,
                } => self.write_entity(*key, team, *base_version)?,
                PendingWrite::Delete { key } => self.delete_row(*key)?,
            }
        }
        Ok(())
    }

    fn write_entity<E: SqlEntity>(
        &self,
        key: RecordKey,
        entity: &E,
        base_version: i64,
    ) -> RepoResult<()> {
        let check = match self.config.concurrency_for(E::KIND) {
            ConcurrencyMode::LastWriterWins => VersionCheck::Unchecked,
            ConcurrencyMode::Optimistic => {
                match self.state.borrow().identity.observed_version(&key) {
                    Some(observed) => VersionCheck::Existing(observed),
                    None => VersionCheck::IfPresent(base_version),
                }
            }
        };
        let outcome = self.engine.upsert(entity, check)?;
        self.state
            .borrow_mut()
            .identity
            .mark_written(key, outcome.version());
        Ok(())
    }

    fn delete_row(&self, (kind, id): RecordKey) -> RepoResult<()> {
        let removed = match kind {
            EntityKind::Member => self.engine.delete::<Member>(MemberId::from(id))?,
            EntityKind::Team => self.engine.delete::<Team>(TeamId::from(id))?,
        };
        if !removed {
            return Err(RepoError::not_found(kind.as_str(), id));
        }
        Ok(())
    }

    /// Runs a storage write; any failure rolls the unit back and aborts it.
    fn guarded<T>(&self, write: impl FnOnce() -> RepoResult<T>) -> RepoResult<T> {
        write().map_err(|err| {
            self.abort(&err);
            err
        })
    }

    fn abort(&self, cause: &RepoError) {
        if let Err(rollback_err) = self.engine.rollback() {
            warn!(
                "event=uow_abort module=uow status=error error_code=rollback_failed \
                 error={rollback_err}"
            );
        }
        let mut state = self.state.borrow_mut();
        state.identity.clear();
        state.pending.clear();
        state.aborted = true;
        warn!("event=uow_abort module=uow status=error error={cause}");
    }

    fn ensure_active(&self) -> RepoResult<()> {
        if self.is_aborted() {
            return Err(RepoError::TransactionAborted);
        }
        Ok(())
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("UnitOfWork")
            .field("tracked", &state.identity.len())
            .field("pending", &state.pending.len())
            .field("aborted", &state.aborted)
            .finish_non_exhaustive()
    }
}

fn id_spec<E: SqlEntity>(id: E::Id) -> Specification<E::Field> {
    let id: Uuid = id.into();
    Specification::leaf_unchecked(
        <E::Field as EntityField>::ID,
        Operator::Equals,
        Operand::Single(Value::Uuid(id)),
    )
}
