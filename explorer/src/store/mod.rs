//! The two storage tiers.
//!
//! ## Ingest tier
//!
//! [`IngestStore`] wraps a `sqlx::SqlitePool` over a single `WITHOUT ROWID`
//! key/value table, configured with:
//! - **WAL mode** so `status` can read while an index run writes.
//! - **synchronous = NORMAL**; a crash loses at most the last batch.
//! - **Embedded migrations** from `explorer/migrations/`.
//!
//! Counters are merged with explicit read-modify-write inside one
//! transaction per batch.
//!
//! ## Serving tier
//!
//! [`ServingStore`] is an immutable, memory-mapped sorted table written
//! once by [`ServingStoreWriter`]; see [`table`] for the file layout.
//!
//! Both tiers implement the capability traits in [`traits`], which is all
//! the compactor depends on.

mod ingest;
mod serving;
pub mod table;
pub mod traits;

pub use ingest::IngestStore;
pub use serving::{ServingStore, ServingStoreWriter, ServingTransaction};
pub use traits::{KeyValueSink, KeyValueSource};

use std::path::PathBuf;

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Store not found: {0}")]
    NotFound(PathBuf),
    #[error("Store already exists: {0}")]
    AlreadyExists(PathBuf),
    #[error("Store is corrupt: {0}")]
    Corrupt(String),
    #[error("Keys must be strictly ascending")]
    OutOfOrder,
    #[error("Store was opened read-only")]
    ReadOnly,
    #[error("Malformed record for key {0}")]
    MalformedRecord(String),
}

/// Record counts of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub entries: u64,
    pub positions: u64,
    pub moves: u64,
}

/// Smallest key greater than every key starting with `prefix`.
///
/// `None` when no such key exists (prefix is all `0xff`).
pub(crate) fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last < 0xff {
            upper.push(last + 1);
            return Some(upper);
        }
    }
    None
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
