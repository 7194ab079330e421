//! One-shot migration of an ingest store into a serving store, and the
//! verification that the copy is faithful.

use std::cmp::Ordering;
use std::path::Path;
use std::time::Instant;

use serde::Serialize;

use crate::config;
use crate::records::RecordKind;
use crate::store::traits::Entry;
use crate::store::{
    hex, IngestStore, KeyValueSink, KeyValueSource, ServingStore, ServingStoreWriter, StoreError,
};

#[derive(Debug, thiserror::Error)]
pub enum CompactionError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Unrecognised record key {0}")]
    UnknownRecord(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactOptions {
    /// Entries per serving-store transaction.
    pub batch_size: usize,
}

impl Default for CompactOptions {
    fn default() -> Self {
        Self {
            batch_size: config::DEFAULT_COMPACT_BATCH_SIZE,
        }
    }
}

impl CompactOptions {
    pub fn from_env() -> Self {
        Self {
            batch_size: config::get_compact_batch_size(),
        }
    }
}

/// Entry counts copied by [`compact_stores`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyCounts {
    pub entries: u64,
    pub positions: u64,
    pub moves: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionReport {
    pub success: bool,
    pub entries_copied: u64,
    pub positions_copied: u64,
    pub moves_copied: u64,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// Copy every entry of `source`, in key order, into `target`.
pub async fn compact_stores<S, T>(
    source: &S,
    target: &mut T,
    options: &CompactOptions,
) -> Result<CopyCounts, CompactionError>
where
    S: KeyValueSource,
    T: KeyValueSink,
{
    let batch_size = options.batch_size.max(1);
    let mut counts = CopyCounts::default();
    let mut after: Option<Vec<u8>> = None;

    loop {
        let batch = source.scan(after.as_deref(), batch_size).await?;
        if batch.is_empty() {
            break;
        }

        for (key, _) in &batch {
            match RecordKind::of_key(key) {
                Some(RecordKind::Position) => counts.positions += 1,
                Some(RecordKind::Move) => counts.moves += 1,
                None => return Err(CompactionError::UnknownRecord(hex(key))),
            }
        }
        target.write_batch(&batch).await?;
        counts.entries += batch.len() as u64;

        let exhausted = batch.len() < batch_size;
        after = batch.into_iter().last().map(|(key, _)| key);
        if exhausted {
            break;
        }

        tracing::debug!(entries = counts.entries, "Compaction batch written");
    }

    target.sync().await?;
    Ok(counts)
}

/// Build a fresh serving store in `target_dir` from the ingest store at
/// `source_path`.
///
/// Never returns an error: failures are reported through
/// [`CompactionReport::error`] with `success = false`. After a failure the
/// target directory's contents are undefined.
#[tracing::instrument(skip(options), fields(source = %source_path.display(), target = %target_dir.display()))]
pub async fn compact(
    source_path: &Path,
    target_dir: &Path,
    options: &CompactOptions,
) -> CompactionReport {
    let started = Instant::now();
    tracing::info!("Starting compaction");

    let result = compact_paths(source_path, target_dir, options).await;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(counts) => {
            tracing::info!(
                entries = counts.entries,
                positions = counts.positions,
                moves = counts.moves,
                elapsed_ms,
                "Compaction completed"
            );
            CompactionReport {
                success: true,
                entries_copied: counts.entries,
                positions_copied: counts.positions,
                moves_copied: counts.moves,
                elapsed_ms,
                error: None,
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Compaction failed");
            CompactionReport {
                success: false,
                elapsed_ms,
                error: Some(e.to_string()),
                ..CompactionReport::default()
            }
        }
    }
}

async fn compact_paths(
    source_path: &Path,
    target_dir: &Path,
    options: &CompactOptions,
) -> Result<CopyCounts, CompactionError> {
    let source = IngestStore::open_read_only(source_path).await?;
    let mut target = ServingStoreWriter::create(target_dir)?;
    let counts = compact_stores(&source, &mut target, options).await?;
    source.close().await;
    Ok(counts)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Compare every entry rather than a sample.
    pub full: bool,
    /// In sample mode, check every n-th source entry.
    pub sample_every: u64,
    pub batch_size: usize,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            full: false,
            sample_every: 1_000,
            batch_size: config::DEFAULT_COMPACT_BATCH_SIZE,
        }
    }
}

/// One difference between source and target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Discrepancy {
    CountMismatch { source: u64, target: u64 },
    MissingInTarget { key: String },
    UnexpectedInTarget { key: String },
    ValueMismatch { key: String },
    ChecksumFailure { message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub source_entries: u64,
    pub target_entries: u64,
    pub checked_entries: u64,
    pub discrepancies: Vec<Discrepancy>,
}

impl VerificationReport {
    pub fn is_valid(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// Buffered forward walk over a [`KeyValueSource`].
struct Walker<'a, S> {
    source: &'a S,
    batch_size: usize,
    buffer: std::vec::IntoIter<Entry>,
    last_key: Option<Vec<u8>>,
    done: bool,
}

impl<'a, S: KeyValueSource> Walker<'a, S> {
    fn new(source: &'a S, batch_size: usize) -> Self {
        Self {
            source,
            batch_size: batch_size.max(1),
            buffer: Vec::new().into_iter(),
            last_key: None,
            done: false,
        }
    }

    async fn next(&mut self) -> Result<Option<Entry>, StoreError> {
        if let Some(entry) = self.buffer.next() {
            return Ok(Some(entry));
        }
        if self.done {
            return Ok(None);
        }
        let batch = self.source.scan(self.last_key.as_deref(), self.batch_size).await?;
        if batch.len() < self.batch_size {
            self.done = true;
        }
        self.last_key = batch.last().map(|(key, _)| key.clone());
        self.buffer = batch.into_iter();
        Ok(self.buffer.next())
    }
}

/// Compare two stores. Differences are collected, never raised.
pub async fn verify_stores<S, T>(
    source: &S,
    target: &T,
    options: &VerifyOptions,
) -> Result<VerificationReport, CompactionError>
where
    S: KeyValueSource,
    T: KeyValueSource,
{
    let mut report = VerificationReport {
        source_entries: source.entry_count().await?,
        target_entries: target.entry_count().await?,
        ..VerificationReport::default()
    };
    if report.source_entries != report.target_entries {
        report.discrepancies.push(Discrepancy::CountMismatch {
            source: report.source_entries,
            target: report.target_entries,
        });
    }

    if options.full {
        full_compare(source, target, options.batch_size, &mut report).await?;
    } else {
        sample_compare(source, target, options, &mut report).await?;
    }
    Ok(report)
}

async fn full_compare<S, T>(
    source: &S,
    target: &T,
    batch_size: usize,
    report: &mut VerificationReport,
) -> Result<(), CompactionError>
where
    S: KeyValueSource,
    T: KeyValueSource,
{
    let mut left = Walker::new(source, batch_size);
    let mut right = Walker::new(target, batch_size);
    let mut l = left.next().await?;
    let mut r = right.next().await?;

    loop {
        let advance = match (&l, &r) {
            (None, None) => break,
            (Some((key, _)), None) => {
                report.discrepancies.push(Discrepancy::MissingInTarget { key: hex(key) });
                Advance::Source
            }
            (None, Some((key, _))) => {
                report.discrepancies.push(Discrepancy::UnexpectedInTarget { key: hex(key) });
                Advance::Target
            }
            (Some((lk, lv)), Some((rk, rv))) => match lk.cmp(rk) {
                Ordering::Equal => {
                    report.checked_entries += 1;
                    if lv != rv {
                        report.discrepancies.push(Discrepancy::ValueMismatch { key: hex(lk) });
                    }
                    Advance::Both
                }
                Ordering::Less => {
                    report.discrepancies.push(Discrepancy::MissingInTarget { key: hex(lk) });
                    Advance::Source
                }
                Ordering::Greater => {
                    report.discrepancies.push(Discrepancy::UnexpectedInTarget { key: hex(rk) });
                    Advance::Target
                }
            },
        };

        if matches!(advance, Advance::Source | Advance::Both) {
            l = left.next().await?;
        }
        if matches!(advance, Advance::Target | Advance::Both) {
            r = right.next().await?;
        }
    }
    Ok(())
}

enum Advance {
    Source,
    Target,
    Both,
}

async fn sample_compare<S, T>(
    source: &S,
    target: &T,
    options: &VerifyOptions,
    report: &mut VerificationReport,
) -> Result<(), CompactionError>
where
    S: KeyValueSource,
    T: KeyValueSource,
{
    let every = options.sample_every.max(1);
    let mut walker = Walker::new(source, options.batch_size);
    let mut index = 0u64;

    while let Some((key, value)) = walker.next().await? {
        if index % every == 0 {
            report.checked_entries += 1;
            match target.get(&key).await? {
                None => report.discrepancies.push(Discrepancy::MissingInTarget { key: hex(&key) }),
                Some(found) if found != value => {
                    report.discrepancies.push(Discrepancy::ValueMismatch { key: hex(&key) })
                }
                Some(_) => {}
            }
        }
        index += 1;
    }
    Ok(())
}

/// Verify the serving store in `target_dir` against the ingest store at
/// `source_path`. A full check also recomputes every page checksum.
#[tracing::instrument(skip(options), fields(source = %source_path.display(), target = %target_dir.display(), full = options.full))]
pub async fn verify_compaction(
    source_path: &Path,
    target_dir: &Path,
    options: &VerifyOptions,
) -> Result<VerificationReport, CompactionError> {
    let source = IngestStore::open_read_only(source_path).await?;
    let target = ServingStore::open(target_dir)?;

    let mut report = verify_stores(&source, &target, options).await?;
    if options.full {
        if let Err(e) = target.verify_checksums() {
            report.discrepancies.push(Discrepancy::ChecksumFailure {
                message: e.to_string(),
            });
        }
    }
    source.close().await;

    tracing::info!(
        source_entries = report.source_entries,
        target_entries = report.target_entries,
        checked = report.checked_entries,
        discrepancies = report.discrepancies.len(),
        "Verification finished"
    );
    Ok(report)
}
