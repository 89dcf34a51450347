//! Transaction handles and their status machine.

use crate::error::{CoreError, CoreResult};
use crate::tx::map::TransactionMap;
use crate::tx::store::TransactionStore;
use crate::tx::undo::UndoRecord;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stratadb_codec::{KeyCodec, ValueCodec};

/// Status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TxStatus {
    /// The transaction accepts reads and writes.
    Open = 0,
    /// `prepare` ran; only commit or rollback remain legal.
    Prepared = 1,
    /// Committed or rolled back; the handle is spent.
    Closed = 2,
}

impl TxStatus {
    /// Converts a persisted byte to a status.
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Open),
            1 => Some(Self::Prepared),
            2 => Some(Self::Closed),
            _ => None,
        }
    }

    /// Converts the status to its persisted byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Prepared => "prepared",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A transaction.
///
/// `Transaction` is a cheap-to-clone handle; a [`TransactionMap`] keeps
/// one internally. A transaction is driven from one thread at a time;
/// the handle itself is `Send + Sync` so it can be moved across
/// threads between operations.
///
/// The lifecycle is `Open` → (optionally `Prepared`) → `Closed`.
/// A closed transaction cannot be reused.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TxInner>,
}

struct TxInner {
    store: TransactionStore,
    id: u64,
    start_version: u64,
    status: Mutex<TxStatus>,
    name: Mutex<Option<String>>,
    log_id: AtomicU64,
}

impl Transaction {
    pub(crate) fn new(
        store: TransactionStore,
        id: u64,
        start_version: u64,
        status: TxStatus,
        name: Option<String>,
        log_id: u64,
    ) -> Self {
        Self {
            inner: Arc::new(TxInner {
                store,
                id,
                start_version,
                status: Mutex::new(status),
                name: Mutex::new(name),
                log_id: AtomicU64::new(log_id),
            }),
        }
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Returns the backing store version at the time the transaction
    /// began.
    #[must_use]
    pub fn start_version(&self) -> u64 {
        self.inner.start_version
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> TxStatus {
        *self.inner.status.lock()
    }

    /// Returns the transaction name, if one was set.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.inner.name.lock().clone()
    }

    /// Returns the store this transaction belongs to.
    #[must_use]
    pub fn store(&self) -> &TransactionStore {
        &self.inner.store
    }

    /// Names the transaction.
    ///
    /// A named transaction is persisted like a prepared one, so it
    /// survives a restart and reappears in
    /// [`TransactionStore::open_transactions`].
    pub fn set_name(&self, name: &str) -> CoreResult<()> {
        self.check_open()?;
        *self.inner.name.lock() = Some(name.to_owned());
        self.inner.store.store_transaction(self);
        Ok(())
    }

    /// Creates a savepoint and returns its id.
    ///
    /// The id is the current log position; it can later be passed to
    /// [`Transaction::rollback_to_savepoint`] or used as a stable read
    /// cutoff via [`TransactionMap::set_savepoint`].
    pub fn set_savepoint(&self) -> CoreResult<u64> {
        self.check_open()?;
        Ok(self.log_id())
    }

    /// Prepares the transaction and persists it.
    ///
    /// Afterwards only commit or rollback are legal.
    pub fn prepare(&self) -> CoreResult<()> {
        self.check_open()?;
        *self.inner.status.lock() = TxStatus::Prepared;
        self.inner.store.store_transaction(self);
        Ok(())
    }

    /// Commits the transaction. Afterwards the transaction is closed.
    pub fn commit(&self) -> CoreResult<()> {
        self.check_not_closed()?;
        self.inner.store.commit(self, self.log_id())
    }

    /// Rolls the transaction back entirely. Afterwards the transaction
    /// is closed.
    pub fn rollback(&self) -> CoreResult<()> {
        self.check_not_closed()?;
        self.inner.store.rollback_to(self, self.log_id(), 0)?;
        self.inner.store.end_transaction(self);
        Ok(())
    }

    /// Rolls back to `savepoint`, undoing every write made after it.
    /// Only allowed while the transaction is open.
    pub fn rollback_to_savepoint(&self, savepoint: u64) -> CoreResult<()> {
        self.check_open()?;
        self.inner.store.rollback_to(self, self.log_id(), savepoint)?;
        self.inner.log_id.store(savepoint, Ordering::SeqCst);
        Ok(())
    }

    /// Returns the names of the maps this transaction changed at or
    /// after `savepoint` (0 for the whole transaction).
    pub fn changed_maps(&self, savepoint: u64) -> CoreResult<HashSet<String>> {
        self.inner
            .store
            .changed_maps(self, self.log_id(), savepoint)
    }

    /// Opens a transactional view of the map named `name`.
    ///
    /// Only allowed while the transaction is open.
    pub fn open_map<K: KeyCodec, V: ValueCodec>(
        &self,
        name: &str,
    ) -> CoreResult<TransactionMap<K, V>> {
        self.check_open()?;
        let map = self.inner.store.kv().open_map(name)?;
        Ok(TransactionMap::new(self.clone(), map))
    }

    /// Appends an undo entry for this transaction's next log id.
    pub(crate) fn log(&self, record: UndoRecord) -> CoreResult<()> {
        let log_id = self.inner.log_id.fetch_add(1, Ordering::SeqCst);
        self.inner.store.log(self.inner.id, log_id, record)
    }

    /// The log id the next write will use.
    pub(crate) fn log_id(&self) -> u64 {
        self.inner.log_id.load(Ordering::SeqCst)
    }

    pub(crate) fn set_status(&self, status: TxStatus) {
        *self.inner.status.lock() = status;
    }

    /// Fails unless the transaction is open.
    pub(crate) fn check_open(&self) -> CoreResult<()> {
        match self.status() {
            TxStatus::Open => Ok(()),
            _ => Err(CoreError::TransactionClosed),
        }
    }

    /// Fails only when the transaction is closed; prepared passes.
    pub(crate) fn check_not_closed(&self) -> CoreResult<()> {
        match self.status() {
            TxStatus::Closed => Err(CoreError::TransactionClosed),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("log_id", &self.log_id())
            .field("name", &self.name())
            .finish()
    }
}
