//! The backing store: journaled, named, ordered byte-keyed maps.
//!
//! This is the persistence engine underneath the transactional layer.
//! It knows nothing about transactions; it provides atomic map
//! primitives (`put_if_absent`, `replace`), range lookups, lazy
//! cursors, and batch-atomic durability via the redo journal.

mod journal;
mod map;
mod store;

pub use journal::{compute_crc32, JournalRecord, JournalRecordType, JOURNAL_MAGIC, JOURNAL_VERSION};
pub use map::{KeyCursor, KvMap};
pub use store::KvStore;
