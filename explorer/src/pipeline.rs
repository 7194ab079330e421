//! Indexing pipeline: game source → parser → processor → ingest store.
//!
//! Games are pulled one at a time, so memory is bounded by one batch of
//! updates regardless of corpus size. Awaiting each `batch_write` is the
//! only backpressure.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chess::pgn::{parse_game, AsyncPgnReader, GameFilter, PgnError};
use serde::Serialize;
use tokio::io::AsyncBufRead;

use crate::config;
use crate::processor::{process_game, ProcessOptions};
use crate::source::GameSource;
use crate::store::{IngestStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Source error: {0}")]
    Source(#[from] PgnError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Game source not found: {0}")]
    SourceNotFound(PathBuf),
    #[error("Failed to start decompressor {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Decompressor {program} failed: {status}")]
    Decompressor { program: String, status: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOptions {
    /// Updates per ingest transaction.
    pub batch_size: usize,
    pub max_ply: Option<usize>,
    pub filter: GameFilter,
    /// Games between progress reports.
    pub progress_interval: u64,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            batch_size: config::DEFAULT_BATCH_SIZE,
            max_ply: None,
            filter: GameFilter::default(),
            progress_interval: config::DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl IndexOptions {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self {
            batch_size: config::get_batch_size(),
            progress_interval: config::get_progress_interval(),
            ..Self::default()
        }
    }
}

/// Snapshot handed to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexProgress {
    pub games_read: u64,
    pub games_indexed: u64,
    pub games_skipped: u64,
    pub positions_indexed: u64,
    pub elapsed: Duration,
}

impl IndexProgress {
    pub fn games_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.games_read as f64 / secs
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSummary {
    pub games_read: u64,
    pub games_indexed: u64,
    pub games_skipped: u64,
    /// Indexed games whose replay stopped at an illegal move.
    pub games_truncated: u64,
    pub positions_indexed: u64,
    pub elapsed_ms: u64,
}

impl IndexSummary {
    fn progress(&self, started: Instant) -> IndexProgress {
        IndexProgress {
            games_read: self.games_read,
            games_indexed: self.games_indexed,
            games_skipped: self.games_skipped,
            positions_indexed: self.positions_indexed,
            elapsed: started.elapsed(),
        }
    }
}

/// Index every game `source` yields into `store`.
#[tracing::instrument(skip_all, fields(batch_size = options.batch_size))]
pub async fn index_games<R, F>(
    source: &mut AsyncPgnReader<R>,
    store: &IngestStore,
    options: &IndexOptions,
    mut on_progress: F,
) -> Result<IndexSummary, PipelineError>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(&IndexProgress),
{
    let started = Instant::now();
    let batch_size = options.batch_size.max(1);
    let interval = options.progress_interval.max(1);
    let max_games = options.filter.max_games.unwrap_or(u64::MAX);
    let process_options = ProcessOptions {
        max_ply: options.max_ply,
    };

    let mut summary = IndexSummary::default();
    let mut batch = Vec::with_capacity(batch_size + 256);

    while summary.games_indexed < max_games {
        let Some(raw) = source.next_game().await? else {
            break;
        };
        summary.games_read += 1;

        match parse_game(&raw, &options.filter) {
            Ok(game) => {
                let processed = process_game(&game, &process_options);
                summary.games_indexed += 1;
                if processed.truncated {
                    summary.games_truncated += 1;
                }
                summary.positions_indexed += processed.updates.len() as u64;
                batch.extend(processed.updates);

                if batch.len() >= batch_size {
                    store.batch_write(&batch).await?;
                    batch.clear();
                }
            }
            Err(reason) => {
                summary.games_skipped += 1;
                tracing::trace!(?reason, game = summary.games_read, "Skipped game");
            }
        }

        if summary.games_read % interval == 0 {
            let progress = summary.progress(started);
            tracing::info!(
                games_read = progress.games_read,
                games_indexed = progress.games_indexed,
                games_skipped = progress.games_skipped,
                positions = progress.positions_indexed,
                games_per_sec = progress.games_per_second() as u64,
                "Indexing progress"
            );
            on_progress(&progress);
        }
    }

    if !batch.is_empty() {
        store.batch_write(&batch).await?;
    }
    store.flush().await?;

    summary.elapsed_ms = started.elapsed().as_millis() as u64;
    on_progress(&summary.progress(started));

    tracing::info!(
        games_read = summary.games_read,
        games_indexed = summary.games_indexed,
        games_skipped = summary.games_skipped,
        games_truncated = summary.games_truncated,
        positions = summary.positions_indexed,
        elapsed_ms = summary.elapsed_ms,
        "Indexing complete"
    );
    Ok(summary)
}

/// Index the corpus at `path`, decompressing on the fly when needed.
pub async fn index_file<F>(
    path: &Path,
    store: &IngestStore,
    options: &IndexOptions,
    on_progress: F,
) -> Result<IndexSummary, PipelineError>
where
    F: FnMut(&IndexProgress),
{
    tracing::info!(path = %path.display(), "Indexing corpus");
    let mut source = GameSource::open(path).await?;
    let summary = index_games(source.reader(), store, options, on_progress).await?;
    source.finish().await?;
    Ok(summary)
}
