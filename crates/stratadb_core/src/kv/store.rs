//! The backing store: named ordered maps over a journaled backend.

use crate::error::{CoreError, CoreResult};
use crate::kv::journal::{self, DirtyLog, JournalRecord};
use crate::kv::map::KvMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use stratadb_storage::{InMemoryBackend, StorageBackend};

/// A store of named ordered maps.
///
/// `KvStore` is a cheap-to-clone handle. Maps are identified by a
/// stable `u32` id and a mutable name; mutations buffer in a shared
/// dirty log and become durable when [`KvStore::commit`] appends them
/// to the backend as one atomic batch.
///
/// Opening a store replays the journal, restoring every map and
/// discarding any torn tail left by a crash.
#[derive(Clone)]
pub struct KvStore {
    shared: Arc<StoreShared>,
}

struct StoreShared {
    backend: Mutex<Box<dyn StorageBackend>>,
    dirty: Arc<DirtyLog>,
    registry: RwLock<Registry>,
    version: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("version", &self.current_version())
            .field("unsaved_ops", &self.unsaved_ops())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct Registry {
    maps_by_id: HashMap<u32, Arc<KvMap>>,
    ids_by_name: HashMap<String, u32>,
    next_map_id: u32,
}

impl KvStore {
    /// Opens a store over `backend`, replaying its journal.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal holds an unsupported format
    /// version or a record that cannot be decoded, or on I/O failure.
    pub fn open(backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let dirty = Arc::new(DirtyLog::default());
        let replay = journal::replay(backend.as_ref())?;
        let mut registry = Registry::default();
        for record in replay.records {
            apply_record(&mut registry, &dirty, record)?;
        }
        let mut backend = backend;
        let size = backend.size()?;
        if size > replay.durable_end {
            tracing::warn!(
                durable_end = replay.durable_end,
                size,
                "truncating incomplete journal tail"
            );
            backend.truncate(replay.durable_end)?;
        }
        tracing::debug!(
            version = replay.version,
            maps = registry.maps_by_id.len(),
            "store opened"
        );
        Ok(Self {
            shared: Arc::new(StoreShared {
                backend: Mutex::new(backend),
                dirty,
                registry: RwLock::new(registry),
                version: AtomicU64::new(replay.version),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Opens an ephemeral store backed by memory.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open(Box::new(InMemoryBackend::new()))
    }

    /// Opens the map named `name`, creating it if needed.
    pub fn open_map(&self, name: &str) -> CoreResult<Arc<KvMap>> {
        self.check_open()?;
        let mut registry = self.shared.registry.write();
        if let Some(&id) = registry.ids_by_name.get(name) {
            let map = registry
                .maps_by_id
                .get(&id)
                .ok_or_else(|| CoreError::invalid_state(format!("map {name} has a dangling id")))?;
            return Ok(Arc::clone(map));
        }
        let id = registry.next_map_id;
        registry.next_map_id += 1;
        let map = Arc::new(KvMap::new(id, name.to_owned(), Arc::clone(&self.shared.dirty)));
        registry.maps_by_id.insert(id, Arc::clone(&map));
        registry.ids_by_name.insert(name.to_owned(), id);
        self.shared.dirty.push(JournalRecord::CreateMap {
            id,
            name: name.to_owned(),
        });
        Ok(map)
    }

    /// Returns the map with the given id, if it exists.
    #[must_use]
    pub fn map_by_id(&self, id: u32) -> Option<Arc<KvMap>> {
        self.shared.registry.read().maps_by_id.get(&id).cloned()
    }

    /// Resolves a map id to its current name.
    #[must_use]
    pub fn map_name(&self, id: u32) -> Option<String> {
        self.shared
            .registry
            .read()
            .maps_by_id
            .get(&id)
            .map(|m| m.name())
    }

    /// Renames the map with the given id.
    ///
    /// # Errors
    ///
    /// Fails if no such map exists or the new name is taken.
    pub fn rename_map(&self, id: u32, new_name: &str) -> CoreResult<()> {
        self.check_open()?;
        let mut registry = self.shared.registry.write();
        let map = registry
            .maps_by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::invalid_argument(format!("no map with id {id}")))?;
        if let Some(&other) = registry.ids_by_name.get(new_name) {
            if other != id {
                return Err(CoreError::invalid_argument(format!(
                    "map name {new_name} is already in use"
                )));
            }
            return Ok(());
        }
        registry.ids_by_name.remove(&map.name());
        registry.ids_by_name.insert(new_name.to_owned(), id);
        map.set_name(new_name.to_owned());
        self.shared.dirty.push(JournalRecord::RenameMap {
            id,
            name: new_name.to_owned(),
        });
        Ok(())
    }

    /// Removes the map with the given id and all its entries.
    pub fn remove_map(&self, id: u32) -> CoreResult<()> {
        self.check_open()?;
        let mut registry = self.shared.registry.write();
        let map = registry
            .maps_by_id
            .remove(&id)
            .ok_or_else(|| CoreError::invalid_argument(format!("no map with id {id}")))?;
        registry.ids_by_name.remove(&map.name());
        map.mark_dropped();
        self.shared.dirty.push(JournalRecord::DropMap { id });
        Ok(())
    }

    /// Number of buffered operations not yet committed to the backend.
    #[must_use]
    pub fn unsaved_ops(&self) -> usize {
        self.shared.dirty.len()
    }

    /// The store version: the number of the last committed batch.
    #[must_use]
    pub fn current_version(&self) -> u64 {
        self.shared.version.load(Ordering::Acquire)
    }

    /// Returns true once [`KvStore::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Commits all buffered operations as one atomic batch and flushes.
    ///
    /// Returns the new store version. A commit with nothing buffered is
    /// a no-op.
    pub fn commit(&self) -> CoreResult<u64> {
        self.check_open()?;
        let mut backend = self.shared.backend.lock();
        let ops = self.shared.dirty.drain();
        if ops.is_empty() {
            return Ok(self.current_version());
        }
        let version = self.shared.version.load(Ordering::Acquire) + 1;
        for op in &ops {
            backend.append(&op.frame()?)?;
        }
        backend.append(&JournalRecord::Commit { version }.frame()?)?;
        backend.flush()?;
        self.shared.version.store(version, Ordering::Release);
        tracing::trace!(version, ops = ops.len(), "store committed");
        Ok(version)
    }

    /// Commits buffered operations, syncs the backend, and marks the
    /// store closed. Further mutation fails with
    /// [`CoreError::StoreClosed`].
    pub fn close(&self) -> CoreResult<()> {
        self.commit()?;
        self.shared.backend.lock().sync()?;
        self.shared.closed.store(true, Ordering::Release);
        tracing::debug!(version = self.current_version(), "store closed");
        Ok(())
    }

    /// Bytes held by the underlying backend.
    pub fn disk_space_used(&self) -> CoreResult<u64> {
        Ok(self.shared.backend.lock().size()?)
    }

    fn check_open(&self) -> CoreResult<()> {
        if self.is_closed() {
            Err(CoreError::StoreClosed)
        } else {
            Ok(())
        }
    }
}

fn apply_record(
    registry: &mut Registry,
    dirty: &Arc<DirtyLog>,
    record: JournalRecord,
) -> CoreResult<()> {
    match record {
        JournalRecord::CreateMap { id, name } => {
            let map = Arc::new(KvMap::new(id, name.clone(), Arc::clone(dirty)));
            registry.maps_by_id.insert(id, map);
            registry.ids_by_name.insert(name, id);
            registry.next_map_id = registry.next_map_id.max(id + 1);
        }
        JournalRecord::RenameMap { id, name } => {
            let map = replayed_map(registry, id)?;
            registry.ids_by_name.remove(&map.name());
            registry.ids_by_name.insert(name.clone(), id);
            map.set_name(name);
        }
        JournalRecord::DropMap { id } => {
            if let Some(map) = registry.maps_by_id.remove(&id) {
                registry.ids_by_name.remove(&map.name());
            }
        }
        JournalRecord::ClearMap { id } => {
            replayed_map(registry, id)?.apply_clear();
        }
        JournalRecord::Put { map_id, key, value } => {
            replayed_map(registry, map_id)?.apply_put(key, value);
        }
        JournalRecord::Remove { map_id, key } => {
            replayed_map(registry, map_id)?.apply_remove(&key);
        }
        JournalRecord::Commit { .. } => {
            // versions are handled by the replay scan itself
        }
    }
    Ok(())
}

fn replayed_map(registry: &Registry, id: u32) -> CoreResult<Arc<KvMap>> {
    registry
        .maps_by_id
        .get(&id)
        .cloned()
        .ok_or_else(|| CoreError::journal_corruption(format!("record for unknown map {id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratadb_storage::FileBackend;
    use tempfile::tempdir;

    #[test]
    fn open_map_assigns_stable_ids() {
        let store = KvStore::open_in_memory().unwrap();
        let a = store.open_map("a").unwrap();
        let b = store.open_map("b").unwrap();
        assert_ne!(a.id(), b.id());
        let a_again = store.open_map("a").unwrap();
        assert_eq!(a.id(), a_again.id());
    }

    #[test]
    fn map_lookup_by_id_and_name() {
        let store = KvStore::open_in_memory().unwrap();
        let map = store.open_map("data").unwrap();
        assert_eq!(store.map_name(map.id()), Some("data".to_owned()));
        assert!(store.map_by_id(map.id()).is_some());
        assert!(store.map_by_id(999).is_none());
    }

    #[test]
    fn rename_updates_registry() {
        let store = KvStore::open_in_memory().unwrap();
        let map = store.open_map("old").unwrap();
        store.rename_map(map.id(), "new").unwrap();
        assert_eq!(map.name(), "new");
        assert_eq!(store.open_map("new").unwrap().id(), map.id());

        let other = store.open_map("taken").unwrap();
        assert!(store.rename_map(map.id(), "taken").is_err());
        assert_eq!(other.name(), "taken");
    }

    #[test]
    fn remove_map_drops_it() {
        let store = KvStore::open_in_memory().unwrap();
        let map = store.open_map("doomed").unwrap();
        store.remove_map(map.id()).unwrap();
        assert!(map.is_dropped());
        assert!(store.map_by_id(map.id()).is_none());
        // reopening the name creates a fresh map
        let fresh = store.open_map("doomed").unwrap();
        assert_ne!(fresh.id(), map.id());
    }

    #[test]
    fn unsaved_ops_counts_buffered_mutations() {
        let store = KvStore::open_in_memory().unwrap();
        let map = store.open_map("m").unwrap();
        let base = store.unsaved_ops();
        map.put(b"k".to_vec(), b"v".to_vec());
        assert_eq!(store.unsaved_ops(), base + 1);
        store.commit().unwrap();
        assert_eq!(store.unsaved_ops(), 0);
    }

    #[test]
    fn commit_bumps_version() {
        let store = KvStore::open_in_memory().unwrap();
        assert_eq!(store.current_version(), 0);
        let map = store.open_map("m").unwrap();
        map.put(b"k".to_vec(), b"v".to_vec());
        assert_eq!(store.commit().unwrap(), 1);
        // nothing dirty: version stays put
        assert_eq!(store.commit().unwrap(), 1);
    }

    #[test]
    fn reopen_restores_maps_and_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.journal");
        let map_id;
        {
            let store =
                KvStore::open(Box::new(FileBackend::open(&path).unwrap())).unwrap();
            let map = store.open_map("data").unwrap();
            map_id = map.id();
            map.put(b"a".to_vec(), b"1".to_vec());
            map.put(b"b".to_vec(), b"2".to_vec());
            map.remove(b"b");
            store.close().unwrap();
        }
        let store = KvStore::open(Box::new(FileBackend::open(&path).unwrap())).unwrap();
        let map = store.open_map("data").unwrap();
        assert_eq!(map.id(), map_id);
        assert_eq!(map.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(map.get(b"b"), None);
    }

    #[test]
    fn uncommitted_changes_do_not_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.journal");
        {
            let store =
                KvStore::open(Box::new(FileBackend::open(&path).unwrap())).unwrap();
            let map = store.open_map("data").unwrap();
            map.put(b"committed".to_vec(), b"1".to_vec());
            store.commit().unwrap();
            map.put(b"lost".to_vec(), b"2".to_vec());
            // no commit: simulated crash
        }
        let store = KvStore::open(Box::new(FileBackend::open(&path).unwrap())).unwrap();
        let map = store.open_map("data").unwrap();
        assert_eq!(map.get(b"committed"), Some(b"1".to_vec()));
        assert_eq!(map.get(b"lost"), None);
    }

    #[test]
    fn closed_store_rejects_mutation() {
        let store = KvStore::open_in_memory().unwrap();
        store.open_map("m").unwrap();
        store.close().unwrap();
        assert!(matches!(
            store.open_map("other"),
            Err(CoreError::StoreClosed)
        ));
        assert!(matches!(store.commit(), Err(CoreError::StoreClosed)));
    }

    #[test]
    fn disk_space_grows_with_commits() {
        let store = KvStore::open_in_memory().unwrap();
        let before = store.disk_space_used().unwrap();
        let map = store.open_map("m").unwrap();
        map.put(b"k".to_vec(), vec![0u8; 128]);
        store.commit().unwrap();
        assert!(store.disk_space_used().unwrap() > before);
    }
}
