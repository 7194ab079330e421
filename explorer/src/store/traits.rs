//! Async capability traits over ordered key/value stores.
//!
//! All returned futures are `Send`.

use std::future::Future;

use super::StoreError;

/// An owned key/value pair.
pub type Entry = (Vec<u8>, Vec<u8>);

/// Read access in key order.
pub trait KeyValueSource: Send + Sync {
    fn get(
        &self,
        key: &[u8],
    ) -> impl Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send;

    /// Up to `limit` entries with keys strictly greater than `after`
    /// (from the first key when `after` is `None`), ascending.
    fn scan(
        &self,
        after: Option<&[u8]>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Entry>, StoreError>> + Send;

    fn entry_count(&self) -> impl Future<Output = Result<u64, StoreError>> + Send;
}

/// Bulk write access.
pub trait KeyValueSink: Send {
    /// Write one batch atomically.
    fn write_batch(
        &mut self,
        entries: &[Entry],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Make everything written so far durable.
    fn sync(&mut self) -> impl Future<Output = Result<(), StoreError>> + Send;
}
