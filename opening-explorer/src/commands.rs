//! Subcommand implementations.
//!
//! Each command resolves its corpus against the [`DataLayout`], runs the
//! library operation and prints a JSON report to stdout. Logs go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use chess::pgn::GameFilter;
use clap::Args;
use explorer::config::{lichess_corpus, DataLayout, CUSTOM_CORPUS};
use explorer::{
    compact, index_file, verify_compaction, CompactOptions, Explorer, IndexOptions, IngestStore,
    OpeningBook, OpeningLookup, QueryOptions, ServingStore, StoreStats, VerifyOptions,
};
use serde::Serialize;

use crate::download;

/// Selects a corpus: a monthly dump by `--year`/`--month`, or a named one.
#[derive(Debug, Clone, Args)]
pub struct CorpusArgs {
    /// Year of the monthly Lichess dump.
    #[arg(long, requires = "month")]
    pub year: Option<u16>,

    /// Month of the monthly Lichess dump (1-12).
    #[arg(long, requires = "year", value_parser = clap::value_parser!(u8).range(1..=12))]
    pub month: Option<u8>,

    /// Corpus name when no year/month is given.
    #[arg(long, default_value = CUSTOM_CORPUS, conflicts_with_all = ["year", "month"])]
    pub corpus: String,
}

impl CorpusArgs {
    pub fn name(&self) -> String {
        match (self.year, self.month) {
            (Some(year), Some(month)) => lichess_corpus(year, month),
            _ => self.corpus.clone(),
        }
    }

    fn dump(&self) -> Option<(u16, u8)> {
        self.year.zip(self.month)
    }
}

#[derive(Debug, Clone, Args)]
pub struct IndexArgs {
    #[command(flatten)]
    pub corpus: CorpusArgs,

    /// Index this PGN file (optionally .zst/.bz2/.gz) instead of a monthly dump.
    #[arg(long, conflicts_with_all = ["year", "month"])]
    pub input: Option<PathBuf>,

    /// Skip games whose average rating is below this.
    #[arg(long)]
    pub min_rating: Option<u32>,

    /// Stop after this many indexed games.
    #[arg(long)]
    pub max_games: Option<u64>,

    /// Only index the first N plies of each game.
    #[arg(long)]
    pub max_ply: Option<usize>,

    /// Updates per ingest transaction.
    #[arg(long)]
    pub batch_size: Option<usize>,
}

impl IndexArgs {
    fn options(&self) -> IndexOptions {
        let mut options = IndexOptions::from_env();
        if let Some(batch_size) = self.batch_size {
            options.batch_size = batch_size;
        }
        options.max_ply = self.max_ply;
        options.filter = GameFilter {
            min_rating: self.min_rating,
            max_games: self.max_games,
        };
        options
    }

    fn source(&self, layout: &DataLayout) -> anyhow::Result<PathBuf> {
        if let Some(input) = &self.input {
            return Ok(input.clone());
        }
        match self.corpus.dump() {
            Some((year, month)) => Ok(download::dump_path(&layout.downloads_dir(), year, month)),
            None => bail!("either --input or --year/--month is required"),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct CompactArgs {
    #[command(flatten)]
    pub corpus: CorpusArgs,

    /// Entries per serving-store transaction.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Replace an existing serving store.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, Args)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub corpus: CorpusArgs,

    /// Compare every entry and recompute page checksums.
    #[arg(long)]
    pub full: bool,
}

#[derive(Debug, Clone, Args)]
pub struct QueryArgs {
    #[command(flatten)]
    pub corpus: CorpusArgs,

    /// Position to look up.
    #[arg(long)]
    pub fen: String,

    /// Maximum number of moves returned (all when omitted).
    #[arg(long)]
    pub limit: Option<usize>,

    /// Opening names table (eco, name, pgn; tab separated).
    #[arg(long)]
    pub openings: Option<PathBuf>,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Remove an ingest database along with its WAL side files.
async fn remove_ingest_db(path: &Path) -> anyhow::Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        match tokio::fs::remove_file(&name).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("removing {}", PathBuf::from(name).display()))
            }
        }
    }
    Ok(())
}

pub async fn run_download(layout: &DataLayout, year: u16, month: u8) -> anyhow::Result<()> {
    let path = download::download_dump(&layout.downloads_dir(), year, month).await?;
    println!("{}", path.display());
    Ok(())
}

pub async fn run_index(layout: &DataLayout, args: &IndexArgs) -> anyhow::Result<()> {
    let corpus = args.corpus.name();
    let source = args.source(layout)?;
    let db_path = layout.ingest_db(&corpus);

    // Counters are additive, so a re-run starts from an empty store.
    if db_path.exists() {
        tracing::warn!(path = %db_path.display(), "Replacing existing ingest store");
        remove_ingest_db(&db_path).await?;
    }

    let store = IngestStore::open(&db_path)
        .await
        .with_context(|| format!("opening ingest store {}", db_path.display()))?;
    let summary = index_file(&source, &store, &args.options(), |_| {})
        .await
        .with_context(|| format!("indexing {}", source.display()))?;
    store.close().await;

    print_json(&summary)
}

pub async fn run_compact(layout: &DataLayout, args: &CompactArgs) -> anyhow::Result<()> {
    let corpus = args.corpus.name();
    let source = layout.ingest_db(&corpus);
    let target = layout.serving_dir(&corpus);
    let target_file = layout.serving_file(&corpus);

    if target_file.exists() {
        if !args.force {
            bail!(
                "serving store {} already exists; pass --force to replace it",
                target_file.display()
            );
        }
        tracing::warn!(path = %target_file.display(), "Replacing existing serving store");
        tokio::fs::remove_file(&target_file).await?;
    }

    let mut options = CompactOptions::from_env();
    if let Some(batch_size) = args.batch_size {
        options.batch_size = batch_size;
    }

    let report = compact(&source, &target, &options).await;
    print_json(&report)?;
    if !report.success {
        bail!(
            "compaction failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

pub async fn run_verify(layout: &DataLayout, args: &VerifyArgs) -> anyhow::Result<()> {
    let corpus = args.corpus.name();
    let options = VerifyOptions {
        full: args.full,
        ..VerifyOptions::default()
    };
    let report = verify_compaction(
        &layout.ingest_db(&corpus),
        &layout.serving_dir(&corpus),
        &options,
    )
    .await?;
    print_json(&report)?;
    if !report.is_valid() {
        bail!(
            "verification found {} discrepancies",
            report.discrepancies.len()
        );
    }
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CorpusStatus {
    name: String,
    ingest: Option<StoreStats>,
    serving: Option<StoreStats>,
    serving_bytes: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Status {
    data_dir: PathBuf,
    downloads: Vec<String>,
    corpora: Vec<CorpusStatus>,
}

fn dir_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

async fn corpus_status(layout: &DataLayout, name: String) -> CorpusStatus {
    let ingest = match IngestStore::open_read_only(&layout.ingest_db(&name)).await {
        Ok(store) => {
            let stats = store.stats().await;
            store.close().await;
            stats.map_err(|e| tracing::warn!(corpus = %name, error = %e, "Ingest store unreadable")).ok()
        }
        Err(_) => None,
    };
    let serving = ServingStore::open(&layout.serving_dir(&name))
        .map(|store| store.stats())
        .ok();
    let serving_bytes = std::fs::metadata(layout.serving_file(&name))
        .map(|m| m.len())
        .ok();
    CorpusStatus {
        name,
        ingest,
        serving,
        serving_bytes,
    }
}

pub async fn run_status(layout: &DataLayout) -> anyhow::Result<()> {
    let mut names = dir_names(&layout.root().join("ingest"));
    names.extend(dir_names(&layout.root().join("serving")));
    names.sort();
    names.dedup();

    let mut corpora = Vec::with_capacity(names.len());
    for name in names {
        corpora.push(corpus_status(layout, name).await);
    }

    print_json(&Status {
        data_dir: layout.root().to_path_buf(),
        downloads: dir_names(&layout.downloads_dir()),
        corpora,
    })
}

/// Download (for monthly dumps), index, compact and sample-verify.
pub async fn run_build(layout: &DataLayout, args: &IndexArgs) -> anyhow::Result<()> {
    if args.input.is_none() {
        let Some((year, month)) = args.corpus.dump() else {
            bail!("either --input or --year/--month is required");
        };
        download::download_dump(&layout.downloads_dir(), year, month).await?;
    }

    run_index(layout, args).await?;

    let corpus = CorpusArgs {
        corpus: args.corpus.name(),
        year: None,
        month: None,
    };
    run_compact(
        layout,
        &CompactArgs {
            corpus: corpus.clone(),
            batch_size: None,
            force: true,
        },
    )
    .await?;
    run_verify(
        layout,
        &VerifyArgs {
            corpus,
            full: false,
        },
    )
    .await
}

pub async fn run_query(layout: &DataLayout, args: &QueryArgs) -> anyhow::Result<()> {
    let openings: Arc<dyn OpeningLookup> = match &args.openings {
        Some(path) => Arc::new(OpeningBook::load_tsv(path)?),
        None => Arc::new(OpeningBook::builtin()),
    };
    let explorer = Explorer::new(layout.serving_dir(&args.corpus.name()), openings);

    let options = QueryOptions { limit: args.limit };
    let result = explorer.query(&args.fen, &options).await?;
    print_json(&result)
}
