//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level storage backend for StrataDB.
///
/// Backends are append-oriented byte stores. The journal above them
/// writes framed records with `append` and replays them with `read_at`;
/// `truncate` discards a torn tail after a crash.
///
/// # Invariants
///
/// - `append` returns the offset the data was written at
/// - `read_at` returns exactly the bytes previously written there
/// - after `flush` returns, all appended data survives process death
/// - backends are `Send + Sync` so a store handle can be shared
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the read extends
    /// beyond the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage and returns the offset it
    /// was written at.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes all pending writes to durable storage.
    fn flush(&mut self) -> StorageResult<()>;

    /// Syncs data and metadata to durable storage.
    ///
    /// Stronger than `flush`: file metadata (size) is durable too.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes (the next append offset).
    fn size(&self) -> StorageResult<u64>;

    /// Truncates the storage to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` exceeds the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
