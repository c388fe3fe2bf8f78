//! Per-unit identity map and observed-version table.

use crate::model::{Entity, EntityKind, Record};
use std::collections::HashMap;
use uuid::Uuid;

pub(crate) type RecordKey = (EntityKind, Uuid);

pub(crate) fn key_of<E: Entity>(id: E::Id) -> RecordKey {
    (E::KIND, id.into())
}

/// Entities loaded or saved by one unit of work, keyed by kind and id.
///
/// `observed` remembers the stored version last seen for each key and is the
/// baseline for optimistic version checks.
#[derive(Debug, Default)]
pub(crate) struct IdentityMap {
    records: HashMap<RecordKey, Record>,
    observed: HashMap<RecordKey, i64>,
}

impl IdentityMap {
    pub fn get<E: Entity>(&self, id: E::Id) -> Option<E> {
        self.records
            .get(&key_of::<E>(id))
            .and_then(E::from_record)
            .cloned()
    }

    pub fn contains(&self, key: &RecordKey) -> bool {
        self.records.contains_key(key)
    }

    /// Returns the tracked copy of `loaded`, tracking `loaded` when new.
    pub fn merge_loaded<E: Entity>(&mut self, loaded: E) -> E {
        let Some(id) = loaded.id() else {
            return loaded;
        };
        if let Some(tracked) = self.get::<E>(id) {
            return tracked;
        }
        let key = key_of::<E>(id);
        self.observed.insert(key, loaded.version());
        self.records.insert(key, loaded.clone().into_record());
        loaded
    }

    /// Replaces any tracked copy with freshly read state.
    pub fn refresh<E: Entity>(&mut self, loaded: E) -> E {
        if let Some(id) = loaded.id() {
            let key = key_of::<E>(id);
            self.observed.insert(key, loaded.version());
            self.records.insert(key, loaded.clone().into_record());
        }
        loaded
    }

    /// Tracks a saved entity without touching its observed version.
    pub fn put<E: Entity>(&mut self, id: E::Id, entity: E) {
        self.records.insert(key_of::<E>(id), entity.into_record());
    }

    pub fn observed_version(&self, key: &RecordKey) -> Option<i64> {
        self.observed.get(key).copied()
    }

    /// Records the version a flushed write left in storage.
    pub fn mark_written(&mut self, key: RecordKey, version: i64) {
        self.observed.insert(key, version);
        if let Some(record) = self.records.get_mut(&key) {
            record.set_version(version);
        }
    }

    pub fn evict(&mut self, key: &RecordKey) {
        self.records.remove(key);
        self.observed.remove(key);
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.observed.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Member, MemberId};

    fn saved(username: &str, version: i64) -> Member {
        let mut member = Member::with_age(username, 10);
        member.ensure_id();
        member.version = version;
        member
    }

    #[test]
    fn merge_keeps_first_tracked_copy() {
        let mut map = IdentityMap::default();
        let first = saved("memberA", 0);
        let id = first.id.unwrap();
        map.merge_loaded(first.clone());

        let mut newer = first.clone();
        newer.username = "memberB".to_string();
        newer.version = 3;

        let merged = map.merge_loaded(newer);
        assert_eq!(merged, first);
        assert_eq!(map.observed_version(&key_of::<Member>(id)), Some(0));
    }

    #[test]
    fn mark_written_updates_tracked_version() {
        let mut map = IdentityMap::default();
        let member = saved("memberA", 0);
        let id = member.id.unwrap();
        map.put(id, member);

        map.mark_written(key_of::<Member>(id), 4);
        assert_eq!(map.get::<Member>(id).unwrap().version, 4);
        assert_eq!(map.observed_version(&key_of::<Member>(id)), Some(4));
    }

    #[test]
    fn evict_forgets_record_and_version() {
        let mut map = IdentityMap::default();
        let member = saved("memberA", 2);
        let id = member.id.unwrap();
        map.merge_loaded(member);

        map.evict(&key_of::<Member>(id));
        assert!(map.get::<Member>(id).is_none());
        assert_eq!(map.observed_version(&key_of::<Member>(id)), None);
        assert!(map.get::<Member>(MemberId::new()).is_none());
    }
}
