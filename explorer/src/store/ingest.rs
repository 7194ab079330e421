//! SQLite-backed write-optimized store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chess::GameResult;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::SqlitePool;

use super::traits::{Entry, KeyValueSink, KeyValueSource};
use super::{hex, prefix_upper_bound, StoreError, StoreStats};
use crate::hasher::PositionHash;
use crate::records::{
    move_key, move_prefix, position_key, uci_of_move_key, MoveStats, PositionStats,
    PositionUpdate, RecordKind, MOVE_TAG, POSITION_TAG,
};

const SELECT_VALUE: &str = "SELECT value FROM kv WHERE key = ?";
const UPSERT: &str = "INSERT INTO kv (key, value) VALUES (?, ?) \
                      ON CONFLICT(key) DO UPDATE SET value = excluded.value";

/// Pending increment for one key.
#[derive(Debug, Clone, Copy)]
enum Delta {
    Position(PositionStats),
    Move(MoveStats),
}

impl Delta {
    fn decode(key: &[u8], value: &[u8]) -> Result<Self, StoreError> {
        let malformed = || StoreError::MalformedRecord(hex(key));
        match RecordKind::of_key(key).ok_or_else(malformed)? {
            RecordKind::Position => PositionStats::decode(value)
                .map(Self::Position)
                .ok_or_else(malformed),
            RecordKind::Move => MoveStats::decode(value).map(Self::Move).ok_or_else(malformed),
        }
    }

    fn absorb(&mut self, other: &Self) {
        match (self, other) {
            (Self::Position(a), Self::Position(b)) => a.merge(b),
            (Self::Move(a), Self::Move(b)) => a.merge(b),
            // Keys carry their kind, so a key never sees both.
            _ => {}
        }
    }
}

/// Write-optimized store for the ingest phase.
#[derive(Clone)]
pub struct IngestStore {
    pool: SqlitePool,
    path: PathBuf,
    read_only: bool,
}

impl IngestStore {
    /// Open (or create) the store at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            path: path.to_path_buf(),
            read_only: false,
        };
        store.run_migrations().await?;
        tracing::debug!(path = %path.display(), "Opened ingest store");
        Ok(store)
    }

    /// Open an existing store for reading only.
    pub async fn open_read_only(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .read_only(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'kv'")
                .fetch_all(&pool)
                .await?;
        if tables.is_empty() {
            return Err(StoreError::Corrupt(format!(
                "{} has no kv table",
                path.display()
            )));
        }

        Ok(Self {
            pool,
            path: path.to_path_buf(),
            read_only: true,
        })
    }

    #[cfg(test)]
    pub async fn new_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            path: PathBuf::from(":memory:"),
            read_only: false,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    pub async fn increment_position(
        &self,
        hash: PositionHash,
        result: GameResult,
    ) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let mut stats = PositionStats::default();
        stats.record(result);

        let mut tx = self.pool.begin().await?;
        merge_delta(&mut tx, &position_key(hash), &Delta::Position(stats)).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn increment_move(
        &self,
        hash: PositionHash,
        uci: &str,
        result: GameResult,
        rating: Option<u32>,
    ) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let mut stats = MoveStats::default();
        stats.record(result, rating);

        let mut tx = self.pool.begin().await?;
        merge_delta(&mut tx, &move_key(hash, uci), &Delta::Move(stats)).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Apply every update in one transaction.
    ///
    /// Updates are first merged per key in memory, so each distinct key is
    /// read and written exactly once. Returns the number of keys touched.
    pub async fn batch_write(&self, updates: &[PositionUpdate]) -> Result<usize, StoreError> {
        self.ensure_writable()?;
        if updates.is_empty() {
            return Ok(0);
        }

        let mut merged: BTreeMap<Vec<u8>, Delta> = BTreeMap::new();
        for update in updates {
            let mut position = PositionStats::default();
            position.record(update.result);
            accumulate(&mut merged, position_key(update.position), Delta::Position(position));

            let mut mv = MoveStats::default();
            mv.record(update.result, update.rating);
            accumulate(&mut merged, move_key(update.position, &update.uci), Delta::Move(mv));
        }

        let mut tx = self.pool.begin().await?;
        for (key, delta) in &merged {
            merge_delta(&mut tx, key, delta).await?;
        }
        tx.commit().await?;
        Ok(merged.len())
    }

    pub async fn get_position(&self, hash: PositionHash) -> Result<Option<PositionStats>, StoreError> {
        let key = position_key(hash);
        let row: Option<(Vec<u8>,)> = sqlx::query_as(SELECT_VALUE)
            .bind(key.as_slice())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(value,)| {
            PositionStats::decode(&value).ok_or_else(|| StoreError::MalformedRecord(hex(&key)))
        })
        .transpose()
    }

    /// Every move recorded for `hash`, ordered by UCI code.
    pub async fn get_moves(&self, hash: PositionHash) -> Result<Vec<(String, MoveStats)>, StoreError> {
        let prefix = move_prefix(hash);
        let upper = prefix_upper_bound(&prefix)
            .ok_or_else(|| StoreError::MalformedRecord(hex(&prefix)))?;

        let rows: Vec<(Vec<u8>, Vec<u8>)> =
            sqlx::query_as("SELECT key, value FROM kv WHERE key > ? AND key < ? ORDER BY key")
                .bind(prefix.as_slice())
                .bind(upper.as_slice())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(key, value)| {
                let uci = uci_of_move_key(&key).ok_or_else(|| StoreError::MalformedRecord(hex(&key)))?;
                let stats =
                    MoveStats::decode(&value).ok_or_else(|| StoreError::MalformedRecord(hex(&key)))?;
                Ok((uci.to_string(), stats))
            })
            .collect()
    }

    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let (positions,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM kv WHERE key >= ? AND key < ?")
            .bind(vec![POSITION_TAG])
            .bind(vec![MOVE_TAG])
            .fetch_one(&self.pool)
            .await?;
        let (moves,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM kv WHERE key >= ?")
            .bind(vec![MOVE_TAG])
            .fetch_one(&self.pool)
            .await?;
        let (entries,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM kv")
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreStats {
            entries: entries as u64,
            positions: positions as u64,
            moves: moves as u64,
        })
    }

    /// Checkpoint the WAL into the main database file.
    pub async fn flush(&self) -> Result<(), StoreError> {
        if self.read_only {
            return Ok(());
        }
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn accumulate(merged: &mut BTreeMap<Vec<u8>, Delta>, key: Vec<u8>, delta: Delta) {
    merged
        .entry(key)
        .and_modify(|existing| existing.absorb(&delta))
        .or_insert(delta);
}

/// Read-modify-write one key.
async fn merge_delta(
    conn: &mut SqliteConnection,
    key: &[u8],
    delta: &Delta,
) -> Result<(), StoreError> {
    let existing: Option<(Vec<u8>,)> = sqlx::query_as(SELECT_VALUE)
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;

    let merged = match existing {
        Some((value,)) => {
            let mut current = Delta::decode(key, &value)?;
            current.absorb(delta);
            current
        }
        None => *delta,
    };

    let value = match merged {
        Delta::Position(stats) => stats.encode().to_vec(),
        Delta::Move(stats) => stats.encode().to_vec(),
    };

    sqlx::query(UPSERT)
        .bind(key)
        .bind(value)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

impl KeyValueSource for IngestStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(SELECT_VALUE)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn scan(&self, after: Option<&[u8]>, limit: usize) -> Result<Vec<Entry>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<(Vec<u8>, Vec<u8>)> = match after {
            Some(after) => {
                sqlx::query_as("SELECT key, value FROM kv WHERE key > ? ORDER BY key LIMIT ?")
                    .bind(after)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT key, value FROM kv ORDER BY key LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows)
    }

    async fn entry_count(&self) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM kv")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

/// Raw entries are merged additively, so one ingest store can absorb
/// another (e.g. combining monthly corpora).
impl KeyValueSink for IngestStore {
    async fn write_batch(&mut self, entries: &[Entry]) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            let delta = Delta::decode(key, value)?;
            merge_delta(&mut tx, key, &delta).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn sync(&mut self) -> Result<(), StoreError> {
        self.flush().await
    }
}
