//! In-process row lock table shared by every unit of work of one database.
//!
//! # Invariants
//! - A key is held either by any number of shared owners or by exactly one
//!   exclusive owner.
//! - `acquire` grants all requested keys or none of them.
//! - Re-acquiring a held key is a no-op; a sole shared owner may upgrade.

use crate::model::EntityKind;
use log::{debug, warn};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared: blocks writers, admits other readers.
    PessimisticRead,
    /// Exclusive: blocks everyone else.
    PessimisticWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockOwner(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl Display for LockKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Debug)]
enum Holders {
    Shared(HashSet<LockOwner>),
    Exclusive(LockOwner),
}

/// Returned when a lock wait exceeds its deadline; names the first blocked key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockWaitTimeout {
    pub key: LockKey,
    pub waited: Duration,
}

#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<HashMap<LockKey, Holders>>,
    released: Condvar,
    next_owner: AtomicU64,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_owner(&self) -> LockOwner {
        LockOwner(self.next_owner.fetch_add(1, Ordering::Relaxed))
    }

    /// Blocks until every key is granted to `owner` in `mode`, or `timeout` elapses.
    pub fn acquire(
        &self,
        owner: LockOwner,
        keys: &[LockKey],
        mode: LockMode,
        timeout: Duration,
    ) -> Result<(), LockWaitTimeout> {
        if keys.is_empty() {
            return Ok(());
        }
        let started_at = Instant::now();
        let deadline = started_at + timeout;
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            match keys
                .iter()
                .find(|key| !grantable(table.get(*key), owner, mode))
            {
                None => {
                    for key in keys {
                        grant(&mut table, *key, owner, mode);
                    }
                    debug!(
                        "event=lock_acquire module=engine status=ok keys={} mode={:?} waited_ms={}",
                        keys.len(),
                        mode,
                        started_at.elapsed().as_millis()
                    );
                    return Ok(());
                }
                Some(blocked) => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(
                            "event=lock_acquire module=engine status=error error_code=lock_timeout \
                             key={} waited_ms={}",
                            blocked,
                            started_at.elapsed().as_millis()
                        );
                        return Err(LockWaitTimeout {
                            key: *blocked,
                            waited: started_at.elapsed(),
                        });
                    }
                    table = self
                        .released
                        .wait_timeout(table, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    /// Drops every lock held by `owner` and wakes waiters.
    pub fn release_all(&self, owner: LockOwner) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.retain(|_, holders| match holders {
            Holders::Exclusive(holder) => *holder != owner,
            Holders::Shared(owners) => {
                owners.remove(&owner);
                !owners.is_empty()
            }
        });
        drop(table);
        self.released.notify_all();
    }

    #[cfg(test)]
    fn held_keys(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn grantable(holders: Option<&Holders>, owner: LockOwner, mode: LockMode) -> bool {
    match (holders, mode) {
        (None, _) => true,
        (Some(Holders::Exclusive(holder)), _) => *holder == owner,
        (Some(Holders::Shared(_)), LockMode::PessimisticRead) => true,
        (Some(Holders::Shared(owners)), LockMode::PessimisticWrite) => {
            owners.len() == 1 && owners.contains(&owner)
        }
    }
}

fn grant(table: &mut HashMap<LockKey, Holders>, key: LockKey, owner: LockOwner, mode: LockMode) {
    match table.entry(key) {
        Entry::Vacant(slot) => {
            slot.insert(match mode {
                LockMode::PessimisticRead => Holders::Shared(HashSet::from([owner])),
                LockMode::PessimisticWrite => Holders::Exclusive(owner),
            });
        }
        Entry::Occupied(mut slot) => match (slot.get_mut(), mode) {
            (Holders::Exclusive(_), _) => {}
            (Holders::Shared(owners), LockMode::PessimisticRead) => {
                owners.insert(owner);
            }
            (holders, LockMode::PessimisticWrite) => *holders = Holders::Exclusive(owner),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn key() -> LockKey {
        LockKey {
            kind: EntityKind::Member,
            id: Uuid::new_v4(),
        }
    }

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn shared_locks_coexist() {
        let locks = LockManager::new();
        let (a, b) = (locks.register_owner(), locks.register_owner());
        let k = key();

        locks.acquire(a, &[k], LockMode::PessimisticRead, SHORT).unwrap();
        locks.acquire(b, &[k], LockMode::PessimisticRead, SHORT).unwrap();
    }

    #[test]
    fn exclusive_lock_times_out_other_owner() {
        let locks = LockManager::new();
        let (a, b) = (locks.register_owner(), locks.register_owner());
        let k = key();

        locks.acquire(a, &[k], LockMode::PessimisticWrite, SHORT).unwrap();
        let err = locks
            .acquire(b, &[k], LockMode::PessimisticRead, SHORT)
            .unwrap_err();
        assert_eq!(err.key, k);
        assert!(err.waited >= SHORT);
    }

    #[test]
    fn reentrant_and_sole_sharer_upgrade() {
        let locks = LockManager::new();
        let a = locks.register_owner();
        let k = key();

        locks.acquire(a, &[k], LockMode::PessimisticRead, SHORT).unwrap();
        locks.acquire(a, &[k], LockMode::PessimisticWrite, SHORT).unwrap();
        locks.acquire(a, &[k], LockMode::PessimisticWrite, SHORT).unwrap();
        assert_eq!(locks.held_keys(), 1);
    }

    #[test]
    fn upgrade_blocked_by_second_sharer() {
        let locks = LockManager::new();
        let (a, b) = (locks.register_owner(), locks.register_owner());
        let k = key();

        locks.acquire(a, &[k], LockMode::PessimisticRead, SHORT).unwrap();
        locks.acquire(b, &[k], LockMode::PessimisticRead, SHORT).unwrap();
        assert!(locks
            .acquire(a, &[k], LockMode::PessimisticWrite, SHORT)
            .is_err());
    }

    #[test]
    fn acquire_is_all_or_nothing() {
        let locks = LockManager::new();
        let (a, b) = (locks.register_owner(), locks.register_owner());
        let (free, taken) = (key(), key());

        locks.acquire(a, &[taken], LockMode::PessimisticWrite, SHORT).unwrap();
        assert!(locks
            .acquire(b, &[free, taken], LockMode::PessimisticWrite, SHORT)
            .is_err());
        locks.acquire(a, &[free], LockMode::PessimisticWrite, SHORT).unwrap();
    }

    #[test]
    fn release_wakes_waiter() {
        let locks = Arc::new(LockManager::new());
        let (a, b) = (locks.register_owner(), locks.register_owner());
        let k = key();
        locks.acquire(a, &[k], LockMode::PessimisticWrite, SHORT).unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                locks.acquire(b, &[k], LockMode::PessimisticWrite, Duration::from_secs(5))
            })
        };
        thread::sleep(Duration::from_millis(20));
        locks.release_all(a);

        assert!(waiter.join().unwrap().is_ok());
        locks.release_all(b);
        assert_eq!(locks.held_keys(), 0);
    }
}
