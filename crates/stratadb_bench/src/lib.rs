//! Benchmark utilities.

use stratadb_core::{KvStore, TransactionStore};

/// Opens an in-memory transaction store for benchmarking.
pub fn bench_store() -> TransactionStore {
    let kv = KvStore::open_in_memory().expect("in-memory store");
    TransactionStore::open(kv).expect("transaction store")
}

/// Generates `count` deterministic key strings.
pub fn generate_keys(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("key:{i:08}")).collect()
}

/// Generates a payload of `size` deterministic bytes.
pub fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}
