//! Transactional map views.

use crate::error::{CoreError, CoreResult};
use crate::kv::{KeyCursor, KvMap};
use crate::tx::transaction::Transaction;
use crate::tx::undo::{undo_key, OpKind, UndoRecord};
use crate::tx::version::VersionedValue;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stratadb_codec::{KeyCodec, ValueCodec};

/// How long the blocking write loop sleeps between attempts on a
/// locked key.
const RETRY_SLEEP: Duration = Duration::from_millis(1);

/// A view of one backing map from the perspective of one transaction.
///
/// Every slot of the backing map holds a [`VersionedValue`]; this view
/// resolves slots to plain values with multi-version reads and performs
/// conflict-checked writes. A slot written by a still-open transaction
/// is locked: only that transaction may overwrite it, and everyone else
/// reads the previous version through the undo log.
///
/// The view carries a read cutoff, `read_log_id` (default: unlimited).
/// Setting it to a savepoint gives statement-stable reads: the
/// transaction's own writes at or after the cutoff are not visible,
/// which is what keeps a statement like "update every counter to
/// counter + 1" from observing its own updates.
pub struct TransactionMap<K, V> {
    tx: Transaction,
    map: Arc<KvMap>,
    read_log_id: u64,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<K: KeyCodec, V: ValueCodec> TransactionMap<K, V> {
    pub(crate) fn new(tx: Transaction, map: Arc<KvMap>) -> Self {
        Self {
            tx,
            map,
            read_log_id: u64::MAX,
            _types: PhantomData,
        }
    }

    /// Returns the backing map id.
    #[must_use]
    pub fn map_id(&self) -> u32 {
        self.map.id()
    }

    /// Returns the backing map name.
    #[must_use]
    pub fn name(&self) -> String {
        self.map.name()
    }

    /// Returns the transaction this view belongs to.
    #[must_use]
    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    /// Sets the read cutoff. Afterwards, reads resolve as of the given
    /// savepoint: the transaction's own writes with a log id at or
    /// above it are skipped.
    ///
    /// This only changes how this view reads; it does not create a
    /// rollback point (that is [`Transaction::set_savepoint`]).
    pub fn set_savepoint(&mut self, savepoint: u64) {
        self.read_log_id = savepoint;
    }

    /// Returns a clone of this view for `tx`, reading as of
    /// `savepoint`.
    #[must_use]
    pub fn instance(&self, tx: &Transaction, savepoint: u64) -> Self {
        Self {
            tx: tx.clone(),
            map: Arc::clone(&self.map),
            read_log_id: savepoint,
            _types: PhantomData,
        }
    }

    /// Returns the value for `key` as of this view's read cutoff.
    pub fn get(&self, key: &K) -> CoreResult<Option<V>> {
        self.get_at(key, self.read_log_id)
    }

    /// Returns the most recent value for `key`, ignoring the read
    /// cutoff.
    pub fn get_latest(&self, key: &K) -> CoreResult<Option<V>> {
        self.get_at(key, u64::MAX)
    }

    /// Returns whether the map contains `key` as seen by this view.
    pub fn contains_key(&self, key: &K) -> CoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Updates the value for `key`, blocking while the key is locked by
    /// another open transaction.
    ///
    /// Returns the previous value as seen by this view.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::LockTimeout`] when the key stays locked
    /// past the store's lock timeout (immediately if the timeout is
    /// zero).
    pub fn put(&self, key: &K, value: &V) -> CoreResult<Option<V>> {
        self.set(key, Some(value))
    }

    /// Removes the entry for `key`, blocking while the key is locked by
    /// another open transaction.
    ///
    /// Returns the previous value as seen by this view.
    pub fn remove(&self, key: &K) -> CoreResult<Option<V>> {
        self.set(key, None)
    }

    /// Tries to update the value for `key` without waiting.
    ///
    /// Returns false if the key is locked by another open transaction.
    pub fn try_put(&self, key: &K, value: &V) -> CoreResult<bool> {
        self.try_set(key, Some(value), false)
    }

    /// Tries to remove the entry for `key` without waiting.
    ///
    /// Returns false if the key is locked by another open transaction.
    pub fn try_remove(&self, key: &K) -> CoreResult<bool> {
        self.try_set(key, None, false)
    }

    /// Tries to set (`Some`) or remove (`None`) the value for `key`.
    ///
    /// With `only_if_unchanged`, the write only happens if the slot has
    /// not changed since this view's read cutoff; a slot this
    /// transaction already rewrote in the current statement is handled
    /// specially (removing it again is a no-op success, re-adding after
    /// a removal is allowed).
    ///
    /// Returns false when the slot is locked by another open
    /// transaction or the compare-and-swap lost a race.
    pub fn try_set(&self, key: &K, value: Option<&V>, only_if_unchanged: bool) -> CoreResult<bool> {
        let key_bytes = key.key_bytes();
        let value_bytes = value.map(ValueCodec::value_bytes);
        self.try_set_bytes(&key_bytes, value_bytes, only_if_unchanged)
    }

    /// Returns the first key of the backing map.
    ///
    /// Like the other key lookups, this is a raw pass-through: the key
    /// may be invisible to this transaction. Combine with
    /// [`TransactionMap::get`] where that matters.
    pub fn first_key(&self) -> CoreResult<Option<K>> {
        Self::decode_key_opt(self.map.first_key())
    }

    /// Returns the last key of the backing map (raw pass-through).
    pub fn last_key(&self) -> CoreResult<Option<K>> {
        Self::decode_key_opt(self.map.last_key())
    }

    /// Returns the smallest backing-map key greater than or equal to
    /// `key` (raw pass-through).
    pub fn ceiling_key(&self, key: &K) -> CoreResult<Option<K>> {
        Self::decode_key_opt(self.map.ceiling_key(&key.key_bytes()))
    }

    /// Returns the smallest backing-map key strictly greater than `key`
    /// (raw pass-through).
    pub fn higher_key(&self, key: &K) -> CoreResult<Option<K>> {
        Self::decode_key_opt(self.map.higher_key(&key.key_bytes()))
    }

    /// Returns the largest backing-map key strictly less than `key`
    /// (raw pass-through).
    pub fn lower_key(&self, key: &K) -> CoreResult<Option<K>> {
        Self::decode_key_opt(self.map.lower_key(&key.key_bytes()))
    }

    /// Iterates over the keys visible to this view, starting at `from`
    /// (inclusive) or at the first key.
    ///
    /// The iterator is lazy and finite; it reflects the backing map as
    /// it advances.
    #[must_use]
    pub fn key_iter(&self, from: Option<&K>) -> KeyIter<'_, K, V> {
        let from = from.map(KeyCodec::key_bytes);
        KeyIter {
            map: self,
            cursor: KvMap::cursor(&self.map, from),
        }
    }

    /// Counts the entries visible to this view.
    ///
    /// O(n): visibility is per-transaction, so there is no maintained
    /// counter to consult.
    pub fn len(&self) -> CoreResult<u64> {
        let mut count = 0;
        for key in self.key_iter(None) {
            key?;
            count += 1;
        }
        Ok(count)
    }

    /// Returns whether this view sees no entries. O(n) in the worst
    /// case, like [`TransactionMap::len`].
    pub fn is_empty(&self) -> CoreResult<bool> {
        for key in self.key_iter(None) {
            key?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Renames the backing map.
    ///
    /// Not transactional: the rename is visible to everyone at once and
    /// is not undone by rollback.
    pub fn rename_map(&self, new_name: &str) -> CoreResult<()> {
        self.tx.store().kv().rename_map(self.map.id(), new_name)
    }

    /// Removes every entry of the backing map.
    ///
    /// Not transactional: the truncation is visible to everyone at once
    /// and is not undone by rollback.
    pub fn clear(&self) {
        self.map.clear();
    }

    /// Drops the backing map from the store.
    ///
    /// Not transactional, like [`TransactionMap::clear`].
    pub fn remove_map(&self) -> CoreResult<()> {
        self.tx.store().kv().remove_map(self.map.id())
    }

    /// Returns whether the backing map has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.map.is_dropped()
    }

    fn get_at(&self, key: &K, max_log_id: u64) -> CoreResult<Option<V>> {
        self.tx.check_open()?;
        let key_bytes = key.key_bytes();
        match self.read_version(&key_bytes, max_log_id)? {
            Some(version) => match version.payload {
                Some(bytes) => Ok(Some(V::from_value_bytes(&bytes)?)),
                // a tombstone reads as absent
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// The multi-version read: resolves the slot for `key_bytes` to the
    /// version visible to this transaction below `max_log_id`.
    ///
    /// Own writes below the cutoff and writes of closed transactions
    /// are returned directly; anything else is chased back through the
    /// undo log until a visible version (or the empty slot) is reached.
    fn read_version(
        &self,
        key_bytes: &[u8],
        max_log_id: u64,
    ) -> CoreResult<Option<VersionedValue>> {
        let store = self.tx.store();
        let mut data = match self.map.get(key_bytes) {
            Some(bytes) => VersionedValue::from_bytes(&bytes)?,
            // does not exist or was deleted by a committed transaction
            None => return Ok(None),
        };
        loop {
            if data.tx_id == self.tx.id() && data.log_id < max_log_id {
                // own earlier write
                return Ok(Some(data));
            }
            if !store.is_transaction_open(data.tx_id) {
                // committed by somebody
                return Ok(Some(data));
            }
            match store.undo_log().get(&undo_key(data.tx_id, data.log_id)) {
                Some(bytes) => match UndoRecord::from_bytes(&bytes)?.old_value {
                    Some(older) => data = older,
                    // the writer created the entry: nothing was visible before
                    None => return Ok(None),
                },
                None => {
                    // the writer finished between the open check and the
                    // undo read; re-read the slot and try again
                    let fresh = match self.map.get(key_bytes) {
                        Some(bytes) => VersionedValue::from_bytes(&bytes)?,
                        None => return Ok(None),
                    };
                    if fresh == data {
                        return Err(CoreError::invalid_state(format!(
                            "undo log entry ({}, {}) missing for an open transaction",
                            data.tx_id, data.log_id
                        )));
                    }
                    data = fresh;
                }
            }
        }
    }

    /// Blocking write wrapper: retries `try_set` while the key is
    /// locked, sleeping briefly between attempts, until the store's
    /// lock timeout runs out.
    fn set(&self, key: &K, value: Option<&V>) -> CoreResult<Option<V>> {
        self.tx.check_open()?;
        let mut start: Option<Instant> = None;
        loop {
            let old = self.get(key)?;
            if self.try_set(key, value, false)? {
                return Ok(old);
            }
            // an uncommitted transaction holds the key: wait for it to
            // finish, or give up when the timeout budget is spent
            let timeout = self.tx.store().lock_timeout();
            if timeout.is_zero() {
                return Err(CoreError::LockTimeout);
            }
            match start {
                None => start = Some(Instant::now()),
                Some(began) => {
                    if began.elapsed() > timeout {
                        return Err(CoreError::LockTimeout);
                    }
                    std::thread::sleep(RETRY_SLEEP);
                }
            }
        }
    }

    fn try_set_bytes(
        &self,
        key_bytes: &[u8],
        value: Option<Vec<u8>>,
        only_if_unchanged: bool,
    ) -> CoreResult<bool> {
        self.tx.check_open()?;
        let current = match self.map.get(key_bytes) {
            Some(bytes) => {
                let version = VersionedValue::from_bytes(&bytes)?;
                Some((bytes, version))
            }
            None => None,
        };

        if only_if_unchanged {
            let base = self.read_version(key_bytes, self.read_log_id)?;
            if base.as_ref() != current.as_ref().map(|(_, version)| version) {
                match &current {
                    Some((_, cur)) if cur.tx_id == self.tx.id() => {
                        if value.is_none() {
                            // removing an entry added or changed in the
                            // same statement: nothing to do
                            return Ok(true);
                        } else if cur.payload.is_none() {
                            // re-adding an entry removed in the same
                            // statement: allowed
                        } else {
                            return Ok(false);
                        }
                    }
                    // changed by another transaction, or the slot
                    // vanished mid-check
                    _ => return Ok(false),
                }
            }
        }

        let slot_is_empty = current
            .as_ref()
            .map_or(true, |(_, version)| version.is_tombstone());
        let op = if slot_is_empty {
            if value.is_some() {
                OpKind::Add
            } else {
                OpKind::Set
            }
        } else if value.is_none() {
            OpKind::Remove
        } else {
            OpKind::Set
        };

        let new_version = VersionedValue::new(self.tx.id(), self.tx.log_id(), value);
        let new_bytes = new_version.to_bytes();

        let Some((current_bytes, current)) = current else {
            // a new slot
            if self
                .map
                .put_if_absent(key_bytes.to_vec(), new_bytes)
                .is_none()
            {
                self.log(op, key_bytes, None)?;
                return Ok(true);
            }
            // somebody else was faster
            return Ok(false);
        };

        if current.tx_id == self.tx.id() {
            // added or updated earlier by this transaction
            if self.map.replace(key_bytes, &current_bytes, new_bytes) {
                self.log(op, key_bytes, Some(current))?;
                return Ok(true);
            }
            return Ok(false);
        }
        if !self.tx.store().is_transaction_open(current.tx_id) {
            // the previous writer committed: overwrite
            if self.map.replace(key_bytes, &current_bytes, new_bytes) {
                self.log(op, key_bytes, Some(current))?;
                return Ok(true);
            }
            // somebody else was faster
            return Ok(false);
        }
        // the key is locked by another open transaction
        Ok(false)
    }

    fn log(&self, op: OpKind, key_bytes: &[u8], old_value: Option<VersionedValue>) -> CoreResult<()> {
        self.tx.log(UndoRecord {
            op,
            map_id: self.map.id(),
            key: key_bytes.to_vec(),
            old_value,
        })
    }

    fn visible(&self, key_bytes: &[u8]) -> CoreResult<bool> {
        self.tx.check_open()?;
        Ok(self
            .read_version(key_bytes, self.read_log_id)?
            .is_some_and(|version| version.payload.is_some()))
    }

    fn decode_key_opt(bytes: Option<Vec<u8>>) -> CoreResult<Option<K>> {
        match bytes {
            Some(bytes) => Ok(Some(K::from_key_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl<K, V> std::fmt::Debug for TransactionMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionMap")
            .field("map_id", &self.map.id())
            .field("name", &self.map.name())
            .field("tx_id", &self.tx.id())
            .field("read_log_id", &self.read_log_id)
            .finish()
    }
}

/// Iterator over the keys visible to one transactional view.
///
/// Yields keys in order; cannot remove entries. Advancing past the end
/// is permanent.
pub struct KeyIter<'a, K, V> {
    map: &'a TransactionMap<K, V>,
    cursor: KeyCursor,
}

impl<K: KeyCodec, V: ValueCodec> Iterator for KeyIter<'_, K, V> {
    type Item = CoreResult<K>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let key = self.cursor.next()?;
            match self.map.visible(&key) {
                Ok(true) => return Some(K::from_key_bytes(&key).map_err(CoreError::from)),
                Ok(false) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}
