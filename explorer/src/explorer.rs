//! Query layer over the serving store.
//!
//! Results are shaped like the Lichess opening-explorer API so existing
//! consumers can read them unchanged.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chess::{canonical_fen, parse_fen, uci_to_san, FenError};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::hasher::PositionHash;
use crate::openings::{Opening, OpeningLookup};
use crate::store::{ServingStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ExplorerError {
    #[error("Invalid FEN: {0}")]
    InvalidFen(#[from] FenError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Maximum number of moves returned; every move when `None`.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorerResult {
    pub white: u64,
    pub draws: u64,
    pub black: u64,
    pub stats: PositionSummary,
    pub moves: Vec<ExplorerMove>,
    /// Always empty; individual games are not indexed.
    pub top_games: Vec<serde_json::Value>,
    pub opening: Option<Opening>,
    pub database: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSummary {
    pub total_games: u64,
    pub white_win_percent: f64,
    pub draw_percent: f64,
    pub black_win_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorerMove {
    pub uci: String,
    pub san: String,
    pub white: u64,
    pub draws: u64,
    pub black: u64,
    pub total_games: u64,
    /// Share of the position's games that continued with this move.
    pub play_rate: f64,
    pub white_win_percent: f64,
    pub draw_percent: f64,
    pub black_win_percent: f64,
    pub average_rating: Option<u32>,
}

/// Percentage rounded to one decimal place; zero when `whole` is zero.
fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 * 1000.0 / whole as f64).round() / 10.0
}

/// Read-only explorer over one serving store.
///
/// The store is opened on first query and can be closed and reopened, e.g.
/// after the directory has been swapped for a rebuilt one.
pub struct Explorer {
    serving_dir: PathBuf,
    database: String,
    openings: Arc<dyn OpeningLookup>,
    store: RwLock<Option<Arc<ServingStore>>>,
}

impl Explorer {
    pub fn new(serving_dir: impl Into<PathBuf>, openings: Arc<dyn OpeningLookup>) -> Self {
        let serving_dir = serving_dir.into();
        let database = serving_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "custom".to_string());
        Self {
            serving_dir,
            database,
            openings,
            store: RwLock::new(None),
        }
    }

    pub fn serving_dir(&self) -> &Path {
        &self.serving_dir
    }

    pub async fn is_open(&self) -> bool {
        self.store.read().await.is_some()
    }

    async fn store(&self) -> Result<Arc<ServingStore>, ExplorerError> {
        if let Some(store) = self.store.read().await.as_ref() {
            return Ok(Arc::clone(store));
        }

        let mut guard = self.store.write().await;
        if let Some(store) = guard.as_ref() {
            return Ok(Arc::clone(store));
        }
        let store = Arc::new(ServingStore::open(&self.serving_dir)?);
        tracing::info!(
            database = %self.database,
            entries = store.stats().entries,
            "Explorer opened serving store"
        );
        *guard = Some(Arc::clone(&store));
        Ok(store)
    }

    /// Aggregate statistics for `fen` and its recorded continuations.
    ///
    /// A position that was never reached yields a zero result, not an error.
    pub async fn query(
        &self,
        fen: &str,
        options: &QueryOptions,
    ) -> Result<ExplorerResult, ExplorerError> {
        let board = parse_fen(fen)?;
        let canonical = canonical_fen(&board);
        let hash = PositionHash::of_canonical(&canonical);

        let store = self.store().await?;
        let position = store.get_position(hash)?.unwrap_or_default();
        let total = position.total();

        let mut moves: Vec<ExplorerMove> = store
            .get_moves(hash)?
            .into_iter()
            .map(|(uci, stats)| {
                let san = uci_to_san(&board, &uci).unwrap_or_else(|e| {
                    tracing::warn!(uci = %uci, position = %hash, error = %e, "Stored move is not legal here");
                    uci.clone()
                });
                let games = stats.games();
                ExplorerMove {
                    san,
                    white: stats.white,
                    draws: stats.draws,
                    black: stats.black,
                    total_games: games,
                    play_rate: percent(games, total),
                    white_win_percent: percent(stats.white, games),
                    draw_percent: percent(stats.draws, games),
                    black_win_percent: percent(stats.black, games),
                    average_rating: stats.average_rating(),
                    uci,
                }
            })
            .collect();

        moves.sort_by(|a, b| {
            b.total_games
                .cmp(&a.total_games)
                .then_with(|| a.uci.cmp(&b.uci))
        });
        if let Some(limit) = options.limit {
            moves.truncate(limit);
        }

        tracing::debug!(position = %hash, total, moves = moves.len(), "Explorer query");

        Ok(ExplorerResult {
            white: position.white,
            draws: position.draws,
            black: position.black,
            stats: PositionSummary {
                total_games: total,
                white_win_percent: percent(position.white, total),
                draw_percent: percent(position.draws, total),
                black_win_percent: percent(position.black, total),
            },
            moves,
            top_games: Vec::new(),
            opening: self.openings.lookup(&canonical),
            database: self.database.clone(),
        })
    }

    /// Drop the mapping; the next query reopens the store.
    pub async fn close(&self) {
        if self.store.write().await.take().is_some() {
            tracing::debug!(database = %self.database, "Explorer closed serving store");
        }
    }
}
