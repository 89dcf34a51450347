//! # StrataDB Core
//!
//! A multi-version transactional layer over a journaled ordered
//! key-value store.
//!
//! This crate provides:
//! - the backing store ([`KvStore`]): named ordered maps with atomic
//!   primitives, made durable by a batch-atomic redo journal
//! - the transactional layer ([`TransactionStore`]): transactions with
//!   snapshot reads, per-key write conflicts, savepoints, prepared
//!   transactions, and crash recovery through a persistent undo log
//!
//! ## Example
//!
//! ```
//! use stratadb_core::{KvStore, TransactionStore};
//!
//! let kv = KvStore::open_in_memory().unwrap();
//! let store = TransactionStore::open(kv).unwrap();
//!
//! let tx = store.begin().unwrap();
//! let map = tx.open_map::<String, String>("accounts").unwrap();
//! map.put(&"alice".to_owned(), &"100".to_owned()).unwrap();
//! tx.commit().unwrap();
//!
//! let tx = store.begin().unwrap();
//! let map = tx.open_map::<String, String>("accounts").unwrap();
//! assert_eq!(map.get(&"alice".to_owned()).unwrap(), Some("100".to_owned()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
pub mod kv;
mod tx;

pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use kv::{KvMap, KvStore};
pub use tx::{
    decode_undo_key, undo_key, KeyIter, OpKind, Transaction, TransactionMap, TransactionStore,
    TxStatus, UndoRecord, VersionedValue, PREPARED_TRANSACTIONS_MAP, SETTINGS_MAP, UNDO_LOG_MAP,
};
