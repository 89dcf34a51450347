//! Ordered byte-keyed maps.

use crate::kv::journal::{DirtyLog, JournalRecord};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An ordered map of byte keys to byte values.
///
/// Entries order bytewise; the codec layer guarantees that key
/// encodings preserve the order of the decoded keys. All operations are
/// atomic with respect to each other, which is what the transactional
/// layer's conflict detection builds on (`put_if_absent` and `replace`
/// are its compare-and-swap primitives).
///
/// Mutations are buffered in the store's dirty log and become durable
/// at the next store commit.
#[derive(Debug)]
pub struct KvMap {
    id: u32,
    name: RwLock<String>,
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    dirty: Arc<DirtyLog>,
    dropped: AtomicBool,
}

impl KvMap {
    pub(crate) fn new(id: u32, name: String, dirty: Arc<DirtyLog>) -> Self {
        Self {
            id,
            name: RwLock::new(name),
            data: RwLock::new(BTreeMap::new()),
            dirty,
            dropped: AtomicBool::new(false),
        }
    }

    /// Returns the stable map id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the current map name.
    #[must_use]
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Returns true once the map has been removed from its store.
    #[must_use]
    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.read().get(key).cloned()
    }

    /// Inserts `value` under `key`, returning the previous value.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Option<Vec<u8>> {
        let mut data = self.data.write();
        let old = data.insert(key.clone(), value.clone());
        self.dirty.push(JournalRecord::Put {
            map_id: self.id,
            key,
            value,
        });
        old
    }

    /// Inserts `value` under `key` only if the slot is vacant.
    ///
    /// Returns `None` on success, or the existing value when the slot
    /// was taken.
    pub fn put_if_absent(&self, key: Vec<u8>, value: Vec<u8>) -> Option<Vec<u8>> {
        let mut data = self.data.write();
        if let Some(existing) = data.get(&key) {
            return Some(existing.clone());
        }
        data.insert(key.clone(), value.clone());
        self.dirty.push(JournalRecord::Put {
            map_id: self.id,
            key,
            value,
        });
        None
    }

    /// Replaces the value under `key` only if it currently equals
    /// `expected`. Returns whether the swap happened.
    pub fn replace(&self, key: &[u8], expected: &[u8], value: Vec<u8>) -> bool {
        let mut data = self.data.write();
        match data.get(key) {
            Some(current) if current == expected => {
                data.insert(key.to_vec(), value.clone());
                self.dirty.push(JournalRecord::Put {
                    map_id: self.id,
                    key: key.to_vec(),
                    value,
                });
                true
            }
            _ => false,
        }
    }

    /// Removes the entry under `key`, returning its value.
    pub fn remove(&self, key: &[u8]) -> Option<Vec<u8>> {
        let mut data = self.data.write();
        let old = data.remove(key);
        if old.is_some() {
            self.dirty.push(JournalRecord::Remove {
                map_id: self.id,
                key: key.to_vec(),
            });
        }
        old
    }

    /// Removes all entries.
    pub fn clear(&self) {
        let mut data = self.data.write();
        data.clear();
        self.dirty.push(JournalRecord::ClearMap { id: self.id });
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the map holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Returns the smallest key.
    #[must_use]
    pub fn first_key(&self) -> Option<Vec<u8>> {
        self.data.read().keys().next().cloned()
    }

    /// Returns the largest key.
    #[must_use]
    pub fn last_key(&self) -> Option<Vec<u8>> {
        self.data.read().keys().next_back().cloned()
    }

    /// Returns the smallest key strictly greater than `key`.
    #[must_use]
    pub fn higher_key(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data
            .read()
            .range::<[u8], _>((Excluded(key), Unbounded))
            .next()
            .map(|(k, _)| k.clone())
    }

    /// Returns the smallest key greater than or equal to `key`.
    #[must_use]
    pub fn ceiling_key(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data
            .read()
            .range::<[u8], _>((Included(key), Unbounded))
            .next()
            .map(|(k, _)| k.clone())
    }

    /// Returns the largest key strictly less than `key`.
    #[must_use]
    pub fn lower_key(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data
            .read()
            .range::<[u8], _>((Unbounded, Excluded(key)))
            .next_back()
            .map(|(k, _)| k.clone())
    }

    /// Returns the largest key less than or equal to `key`.
    #[must_use]
    pub fn floor_key(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data
            .read()
            .range::<[u8], _>((Unbounded, Included(key)))
            .next_back()
            .map(|(k, _)| k.clone())
    }

    /// Creates a cursor over the keys starting at `from` (inclusive), or
    /// at the first key when `from` is `None`.
    #[must_use]
    pub fn cursor(map: &Arc<Self>, from: Option<Vec<u8>>) -> KeyCursor {
        KeyCursor {
            map: Arc::clone(map),
            state: CursorState::Start(from),
        }
    }

    pub(crate) fn set_name(&self, name: String) {
        *self.name.write() = name;
    }

    pub(crate) fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
    }

    // Replay-side mutations: apply journal records without re-journaling.

    pub(crate) fn apply_put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.data.write().insert(key, value);
    }

    pub(crate) fn apply_remove(&self, key: &[u8]) {
        self.data.write().remove(key);
    }

    pub(crate) fn apply_clear(&self) {
        self.data.write().clear();
    }
}

/// A lazy cursor over a map's keys.
///
/// Each step re-seeks past the last returned key, so the cursor never
/// holds a lock between steps and tolerates concurrent mutation: keys
/// inserted behind the cursor are skipped, keys ahead of it are seen.
#[derive(Debug)]
pub struct KeyCursor {
    map: Arc<KvMap>,
    state: CursorState,
}

#[derive(Debug)]
enum CursorState {
    Start(Option<Vec<u8>>),
    After(Vec<u8>),
    Done,
}

impl Iterator for KeyCursor {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        let next = match &self.state {
            CursorState::Start(None) => self.map.first_key(),
            CursorState::Start(Some(from)) => self.map.ceiling_key(from),
            CursorState::After(last) => self.map.higher_key(last),
            CursorState::Done => None,
        };
        match next {
            Some(key) => {
                self.state = CursorState::After(key.clone());
                Some(key)
            }
            None => {
                self.state = CursorState::Done;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_map() -> Arc<KvMap> {
        Arc::new(KvMap::new(1, "test".to_owned(), Arc::new(DirtyLog::default())))
    }

    #[test]
    fn put_get_remove() {
        let map = new_map();
        assert_eq!(map.put(b"a".to_vec(), b"1".to_vec()), None);
        assert_eq!(map.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(map.put(b"a".to_vec(), b"2".to_vec()), Some(b"1".to_vec()));
        assert_eq!(map.remove(b"a"), Some(b"2".to_vec()));
        assert_eq!(map.get(b"a"), None);
    }

    #[test]
    fn put_if_absent_only_fills_vacant_slots() {
        let map = new_map();
        assert_eq!(map.put_if_absent(b"a".to_vec(), b"1".to_vec()), None);
        assert_eq!(
            map.put_if_absent(b"a".to_vec(), b"2".to_vec()),
            Some(b"1".to_vec())
        );
        assert_eq!(map.get(b"a"), Some(b"1".to_vec()));
    }

    #[test]
    fn replace_is_a_compare_and_swap() {
        let map = new_map();
        map.put(b"a".to_vec(), b"1".to_vec());
        assert!(!map.replace(b"a", b"0", b"2".to_vec()));
        assert!(map.replace(b"a", b"1", b"2".to_vec()));
        assert_eq!(map.get(b"a"), Some(b"2".to_vec()));
        assert!(!map.replace(b"missing", b"1", b"2".to_vec()));
    }

    #[test]
    fn range_lookups() {
        let map = new_map();
        for k in [b"b", b"d", b"f"] {
            map.put(k.to_vec(), b"v".to_vec());
        }
        assert_eq!(map.first_key(), Some(b"b".to_vec()));
        assert_eq!(map.last_key(), Some(b"f".to_vec()));
        assert_eq!(map.higher_key(b"b"), Some(b"d".to_vec()));
        assert_eq!(map.higher_key(b"f"), None);
        assert_eq!(map.ceiling_key(b"c"), Some(b"d".to_vec()));
        assert_eq!(map.ceiling_key(b"d"), Some(b"d".to_vec()));
        assert_eq!(map.lower_key(b"d"), Some(b"b".to_vec()));
        assert_eq!(map.floor_key(b"d"), Some(b"d".to_vec()));
        assert_eq!(map.floor_key(b"a"), None);
    }

    #[test]
    fn cursor_walks_keys_in_order() {
        let map = new_map();
        for k in [b"c", b"a", b"b"] {
            map.put(k.to_vec(), b"v".to_vec());
        }
        let keys: Vec<Vec<u8>> = KvMap::cursor(&map, None).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn cursor_from_is_inclusive() {
        let map = new_map();
        for k in [b"a", b"b", b"c"] {
            map.put(k.to_vec(), b"v".to_vec());
        }
        let keys: Vec<Vec<u8>> = KvMap::cursor(&map, Some(b"b".to_vec())).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn cursor_sees_keys_inserted_ahead() {
        let map = new_map();
        map.put(b"a".to_vec(), b"v".to_vec());
        let mut cursor = KvMap::cursor(&map, None);
        assert_eq!(cursor.next(), Some(b"a".to_vec()));
        map.put(b"b".to_vec(), b"v".to_vec());
        assert_eq!(cursor.next(), Some(b"b".to_vec()));
        assert_eq!(cursor.next(), None);
    }

    #[test]
    fn mutations_are_journaled() {
        let dirty = Arc::new(DirtyLog::default());
        let map = KvMap::new(1, "test".to_owned(), Arc::clone(&dirty));
        map.put(b"a".to_vec(), b"1".to_vec());
        map.remove(b"a");
        map.remove(b"a"); // no-op, not journaled
        map.clear();
        assert_eq!(dirty.len(), 3);
    }
}
