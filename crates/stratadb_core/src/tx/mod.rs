//! The transactional layer: multi-version, serializable-snapshot
//! transactions over the backing store's plain maps.
//!
//! Writes leave a versioned breadcrumb in the map slot plus one entry
//! in the persistent undo log; readers never block writers. Conflicts
//! are detected per key: a slot written by an open transaction is
//! locked against everyone else until that transaction ends.

mod map;
mod store;
mod transaction;
mod undo;
mod version;

pub use map::{KeyIter, TransactionMap};
pub use store::{TransactionStore, PREPARED_TRANSACTIONS_MAP, SETTINGS_MAP, UNDO_LOG_MAP};
pub use transaction::{Transaction, TxStatus};
pub use undo::{decode_undo_key, undo_key, OpKind, UndoRecord};
pub use version::VersionedValue;
