//! The transaction store.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::kv::{KvMap, KvStore};
use crate::tx::transaction::{Transaction, TxStatus};
use crate::tx::undo::{decode_undo_key, undo_key, OpKind, UndoRecord};
use crate::tx::version::VersionedValue;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stratadb_codec::{Decoder, Encoder, KeyCodec};

/// Name of the settings map in the backing store.
pub const SETTINGS_MAP: &str = "settings";

/// Name of the persisted prepared-transactions map.
pub const PREPARED_TRANSACTIONS_MAP: &str = "openTransactions";

/// Name of the undo log map.
pub const UNDO_LOG_MAP: &str = "undoLog";

/// Settings key holding the persisted transaction id ceiling.
const LAST_TRANSACTION_ID: &str = "lastTransactionId";

/// How many transaction ids are handed out per persisted ceiling bump.
const TXID_PERSIST_BATCH: u64 = 64;

/// Buffered-operation threshold that forces a backing store commit
/// during long transactions.
const MAX_UNSAVED_OPS: usize = 4096;

/// A store that supports concurrent transactions.
///
/// `TransactionStore` owns three well-known maps in the backing store:
/// `settings` (the persisted transaction id ceiling),
/// `openTransactions` (prepared and named transactions), and `undoLog`
/// (one entry per uncommitted write). It allocates transaction ids,
/// drives commit and rollback, and answers visibility questions for
/// the MVCC read path.
///
/// The handle is cheap to clone; every [`Transaction`] keeps one.
#[derive(Clone)]
pub struct TransactionStore {
    inner: Arc<TsInner>,
}

struct TsInner {
    kv: KvStore,
    settings: Arc<KvMap>,
    prepared: Arc<KvMap>,
    undo_log: Arc<KvMap>,
    state: Mutex<TsState>,
    lock_timeout_ms: AtomicU64,
}

struct TsState {
    last_tx_id: u64,
    last_tx_id_stored: u64,
    /// Smallest transaction id with undo log entries; `None` means
    /// "unknown, recompute from the undo log's first key".
    first_open: Option<u64>,
}

impl TransactionStore {
    /// Opens a transaction store over `kv` with default configuration.
    ///
    /// # Errors
    ///
    /// Fails if the persisted state is inconsistent: a prepared
    /// transaction id above the persisted id ceiling means ids could be
    /// reused, so initialization refuses to continue.
    pub fn open(kv: KvStore) -> CoreResult<Self> {
        Self::open_with_config(kv, Config::default())
    }

    /// Opens a transaction store over `kv` with the given configuration.
    pub fn open_with_config(kv: KvStore, config: Config) -> CoreResult<Self> {
        let settings = kv.open_map(SETTINGS_MAP)?;
        let prepared = kv.open_map(PREPARED_TRANSACTIONS_MAP)?;
        let undo_log = kv.open_map(UNDO_LOG_MAP)?;

        let last_tx_id = match settings.get(LAST_TRANSACTION_ID.as_bytes()) {
            Some(bytes) => parse_tx_id(&bytes)?,
            None => 0,
        };
        if let Some(key) = prepared.last_key() {
            let id = u64::from_key_bytes(&key)?;
            if id > last_tx_id {
                return Err(CoreError::invalid_state(
                    "prepared transaction above the persisted id ceiling",
                ));
            }
        }
        let first_open = match undo_log.first_key() {
            Some(key) => Some(decode_undo_key(&key)?.0),
            None => None,
        };
        tracing::debug!(
            last_tx_id,
            first_open,
            pending = undo_log.len(),
            "transaction store opened"
        );

        let timeout_ms = u64::try_from(config.lock_timeout.as_millis()).unwrap_or(u64::MAX);
        Ok(Self {
            inner: Arc::new(TsInner {
                kv,
                settings,
                prepared,
                undo_log,
                state: Mutex::new(TsState {
                    last_tx_id,
                    last_tx_id_stored: last_tx_id,
                    first_open,
                }),
                lock_timeout_ms: AtomicU64::new(timeout_ms),
            }),
        })
    }

    /// Returns the backing store handle.
    #[must_use]
    pub fn kv(&self) -> &KvStore {
        &self.inner.kv
    }

    /// Returns the lock timeout for blocking writes.
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.lock_timeout_ms.load(Ordering::Relaxed))
    }

    /// Sets the lock timeout for blocking writes. Zero fails
    /// conflicting writes immediately.
    pub fn set_lock_timeout(&self, timeout: Duration) {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.inner.lock_timeout_ms.store(ms, Ordering::Relaxed);
    }

    /// Begins a new transaction.
    ///
    /// Ids are monotonically increasing and never reused: every 64 ids
    /// the ceiling is persisted, so a crash cannot hand out an id twice.
    pub fn begin(&self) -> CoreResult<Transaction> {
        if self.inner.kv.is_closed() {
            return Err(CoreError::StoreClosed);
        }
        let mut state = self.inner.state.lock();
        let id = state.last_tx_id;
        state.last_tx_id += 1;
        if state.last_tx_id > state.last_tx_id_stored {
            state.last_tx_id_stored += TXID_PERSIST_BATCH;
            self.inner.settings.put(
                LAST_TRANSACTION_ID.as_bytes().to_vec(),
                state.last_tx_id_stored.to_string().into_bytes(),
            );
        }
        Ok(Transaction::new(
            self.clone(),
            id,
            self.inner.kv.current_version(),
            TxStatus::Open,
            None,
            0,
        ))
    }

    /// Returns the unclosed transactions that survive in the store:
    /// every transaction with undo log entries plus every persisted
    /// prepared or named transaction, sorted by id.
    ///
    /// After a crash these are the transactions an operator must commit
    /// or roll back.
    pub fn open_transactions(&self) -> CoreResult<Vec<Transaction>> {
        let _guard = self.inner.state.lock();
        let mut found: BTreeMap<u64, (TxStatus, Option<String>, u64)> = BTreeMap::new();

        let mut key = self.inner.undo_log.first_key();
        while let Some(first) = key {
            let (tx_id, _) = decode_undo_key(&first)?;
            let end = undo_key(tx_id, u64::MAX);
            let last = self.inner.undo_log.floor_key(&end).ok_or_else(|| {
                CoreError::invalid_state("undo log range vanished during enumeration")
            })?;
            let (_, last_log_id) = decode_undo_key(&last)?;
            let (status, name) = match self.inner.prepared.get(&tx_id.key_bytes()) {
                Some(bytes) => decode_prepared(&bytes)?,
                None => (TxStatus::Open, None),
            };
            found.insert(tx_id, (status, name, last_log_id + 1));
            key = self.inner.undo_log.higher_key(&end);
        }

        // prepared or named transactions that never wrote anything
        for key in KvMap::cursor(&self.inner.prepared, None) {
            let tx_id = u64::from_key_bytes(&key)?;
            if found.contains_key(&tx_id) {
                continue;
            }
            if let Some(bytes) = self.inner.prepared.get(&key) {
                let (status, name) = decode_prepared(&bytes)?;
                found.insert(tx_id, (status, name, 0));
            }
        }

        let version = self.inner.kv.current_version();
        Ok(found
            .into_iter()
            .map(|(id, (status, name, log_id))| {
                Transaction::new(self.clone(), id, version, status, name, log_id)
            })
            .collect())
    }

    /// Checks whether the given transaction id is still open, i.e. has
    /// undo log entries.
    ///
    /// The `first_open` hint makes the common case cheap: any id below
    /// the smallest id in the undo log is closed.
    pub fn is_transaction_open(&self, tx_id: u64) -> bool {
        let mut state = self.inner.state.lock();
        let first = match state.first_open {
            Some(first) => first,
            None => {
                let Some(key) = self.inner.undo_log.first_key() else {
                    return false;
                };
                let Ok((first, _)) = decode_undo_key(&key) else {
                    return false;
                };
                state.first_open = Some(first);
                first
            }
        };
        if tx_id < first {
            return false;
        }
        if tx_id == first {
            return true;
        }
        match self.inner.undo_log.ceiling_key(&undo_key(tx_id, 0)) {
            Some(key) => matches!(decode_undo_key(&key), Ok((id, _)) if id == tx_id),
            None => false,
        }
    }

    /// Persists the transaction id counter and commits the backing
    /// store.
    ///
    /// The backing store itself stays open; it belongs to the caller.
    pub fn close(&self) -> CoreResult<()> {
        let state = self.inner.state.lock();
        self.inner.settings.put(
            LAST_TRANSACTION_ID.as_bytes().to_vec(),
            state.last_tx_id.to_string().into_bytes(),
        );
        drop(state);
        self.inner.kv.commit()?;
        Ok(())
    }

    /// Persists a prepared or named transaction.
    pub(crate) fn store_transaction(&self, t: &Transaction) {
        let _guard = self.inner.state.lock();
        let status = t.status();
        let name = t.name();
        if status == TxStatus::Prepared || name.is_some() {
            self.inner.prepared.put(
                t.id().key_bytes(),
                encode_prepared(status, name.as_deref()),
            );
        }
    }

    /// Appends one undo log entry for `(tx_id, log_id)`.
    pub(crate) fn log(&self, tx_id: u64, log_id: u64, record: UndoRecord) -> CoreResult<()> {
        self.commit_if_needed()?;
        let mut state = self.inner.state.lock();
        self.inner
            .undo_log
            .put(undo_key(tx_id, log_id), record.to_bytes());
        state.first_open = Some(match state.first_open {
            Some(first) => first.min(tx_id),
            // unknown: the undo log is non-empty now, recompute the hint
            None => match self.inner.undo_log.first_key() {
                Some(key) => decode_undo_key(&key)?.0,
                None => tx_id,
            },
        });
        Ok(())
    }

    /// Commits a transaction: walks its undo range forward, physically
    /// deletes slots whose final state is a tombstone, and drops the
    /// undo entries. Remaining slots become visible to everyone because
    /// their writer is no longer open.
    pub(crate) fn commit(&self, t: &Transaction, max_log_id: u64) -> CoreResult<()> {
        if self.inner.kv.is_closed() {
            return Ok(());
        }
        tracing::debug!(tx_id = t.id(), entries = max_log_id, "committing transaction");
        for log_id in 0..max_log_id {
            self.commit_if_needed()?;
            let key = undo_key(t.id(), log_id);
            let bytes = self.inner.undo_log.get(&key).ok_or_else(|| {
                CoreError::invalid_state(format!(
                    "missing undo log entry {log_id} for transaction {}",
                    t.id()
                ))
            })?;
            let record = UndoRecord::from_bytes(&bytes)?;
            if record.op == OpKind::Remove {
                if let Some(map) = self.inner.kv.map_by_id(record.map_id) {
                    // the entry may have been added again later on
                    if let Some(slot) = map.get(&record.key) {
                        if VersionedValue::from_bytes(&slot)?.is_tombstone() {
                            map.remove(&record.key);
                        }
                    }
                }
            }
            self.inner.undo_log.remove(&key);
        }
        self.end_transaction(t);
        Ok(())
    }

    /// Reverts a transaction's writes from `max_log_id` down to
    /// `to_log_id`, restoring each slot's old value and dropping the
    /// undo entries.
    pub(crate) fn rollback_to(
        &self,
        t: &Transaction,
        max_log_id: u64,
        to_log_id: u64,
    ) -> CoreResult<()> {
        tracing::debug!(
            tx_id = t.id(),
            from = max_log_id,
            to = to_log_id,
            "rolling back"
        );
        for log_id in (to_log_id..max_log_id).rev() {
            self.commit_if_needed()?;
            let key = undo_key(t.id(), log_id);
            let bytes = self.inner.undo_log.get(&key).ok_or_else(|| {
                CoreError::invalid_state(format!(
                    "missing undo log entry {log_id} for transaction {}",
                    t.id()
                ))
            })?;
            let record = UndoRecord::from_bytes(&bytes)?;
            if let Some(map) = self.inner.kv.map_by_id(record.map_id) {
                match record.old_value {
                    // this transaction added the entry
                    None => {
                        map.remove(&record.key);
                    }
                    // this transaction updated the entry
                    Some(old) => {
                        map.put(record.key, old.to_bytes());
                    }
                }
            }
            self.inner.undo_log.remove(&key);
        }
        Ok(())
    }

    /// Closes a transaction: removes its persisted entry and resets the
    /// `first_open` hint for lazy recomputation.
    pub(crate) fn end_transaction(&self, t: &Transaction) {
        let mut state = self.inner.state.lock();
        if t.status() == TxStatus::Prepared || t.name().is_some() {
            self.inner.prepared.remove(&t.id().key_bytes());
        }
        t.set_status(TxStatus::Closed);
        if state.first_open == Some(t.id()) {
            state.first_open = None;
        }
    }

    /// Collects the names of maps touched by undo entries in
    /// `[to_log_id, max_log_id)`.
    pub(crate) fn changed_maps(
        &self,
        t: &Transaction,
        max_log_id: u64,
        to_log_id: u64,
    ) -> CoreResult<std::collections::HashSet<String>> {
        let mut set = std::collections::HashSet::new();
        for log_id in (to_log_id..max_log_id).rev() {
            let key = undo_key(t.id(), log_id);
            let bytes = self.inner.undo_log.get(&key).ok_or_else(|| {
                CoreError::invalid_state(format!(
                    "missing undo log entry {log_id} for transaction {}",
                    t.id()
                ))
            })?;
            let record = UndoRecord::from_bytes(&bytes)?;
            if let Some(name) = self.inner.kv.map_name(record.map_id) {
                set.insert(name);
            }
        }
        Ok(set)
    }

    pub(crate) fn undo_log(&self) -> &Arc<KvMap> {
        &self.inner.undo_log
    }

    /// Forces a backing store commit when too many operations are
    /// buffered, bounding memory during long transactions.
    fn commit_if_needed(&self) -> CoreResult<()> {
        if self.inner.kv.unsaved_ops() > MAX_UNSAVED_OPS {
            self.inner.kv.commit()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for TransactionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TransactionStore")
            .field("last_tx_id", &state.last_tx_id)
            .field("first_open", &state.first_open)
            .field("pending_undo", &self.inner.undo_log.len())
            .finish_non_exhaustive()
    }
}

fn parse_tx_id(bytes: &[u8]) -> CoreResult<u64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| CoreError::invalid_state("malformed lastTransactionId setting"))
}

fn encode_prepared(status: TxStatus, name: Option<&str>) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.write_u8(1);
    enc.write_u8(status.as_u8());
    enc.write_opt(name, |enc, name| enc.write_str(name));
    enc.into_bytes()
}

fn decode_prepared(bytes: &[u8]) -> CoreResult<(TxStatus, Option<String>)> {
    let mut dec = Decoder::new(bytes);
    let status = dec
        .read_opt(|d| d.read_u8())?
        .ok_or_else(|| CoreError::invalid_state("prepared transaction without status"))?;
    let status = TxStatus::from_u8(status).ok_or_else(|| {
        CoreError::invalid_state(format!("invalid persisted transaction status {status}"))
    })?;
    let name = dec.read_opt(|d| d.read_str())?;
    dec.expect_end()?;
    Ok((status, name))
}
