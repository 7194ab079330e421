//! Opening-statistics engine.
//!
//! Games flow through a fixed pipeline:
//!
//! 1. [`pipeline`] pulls games from a [`source::GameSource`], and
//!    [`processor`] replays each into one [`PositionUpdate`] per ply, keyed
//!    by the [`PositionHash`] of the position before the move.
//! 2. Updates are merged into the write-optimized [`IngestStore`].
//! 3. [`compactor`] copies the finished ingest store, in key order, into
//!    an immutable memory-mapped [`ServingStore`].
//! 4. [`Explorer`] answers position queries from the serving store.

pub mod compactor;
pub mod config;
pub mod explorer;
pub mod hasher;
pub mod openings;
pub mod pipeline;
pub mod processor;
pub mod records;
pub mod source;
pub mod store;

pub use compactor::{
    compact, compact_stores, verify_compaction, verify_stores, CompactOptions, CompactionError,
    CompactionReport, Discrepancy, VerificationReport, VerifyOptions,
};
pub use explorer::{Explorer, ExplorerError, ExplorerMove, ExplorerResult, QueryOptions};
pub use hasher::PositionHash;
pub use openings::{Opening, OpeningBook, OpeningError, OpeningLookup};
pub use pipeline::{index_file, index_games, IndexOptions, IndexProgress, IndexSummary, PipelineError};
pub use processor::{process_game, ProcessOptions, ProcessedGame};
pub use records::{MoveStats, PositionStats, PositionUpdate};
pub use store::{
    IngestStore, KeyValueSink, KeyValueSource, ServingStore, ServingStoreWriter, StoreError,
    StoreStats,
};
