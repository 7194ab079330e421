//! Opening explorer operator CLI.
//!
//! Builds and queries position-statistics databases from PGN corpora:
//!
//! - `download` fetches a monthly Lichess dump into `<data>/downloads/`.
//! - `index` replays every game into the ingest store at
//!   `<data>/ingest/<corpus>/ingest.db`.
//! - `compact` copies the ingest store into the read-only serving store at
//!   `<data>/serving/<corpus>/data.oxt`; `verify` compares the two.
//! - `build` runs all of the above in order.
//! - `query` answers a single position lookup as JSON.
//! - `status` reports what is on disk.
//!
//! The data directory defaults to [`explorer::config::get_data_dir`]; see
//! [`explorer::config`] and [`config`] for the environment overrides.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use explorer::config::DataLayout;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod download;

use commands::{CompactArgs, IndexArgs, QueryArgs, VerifyArgs};

#[derive(Parser)]
#[command(name = "opening-explorer", about = "Chess opening statistics from PGN corpora")]
struct Cli {
    /// Root of the on-disk layout (downloads, ingest and serving stores).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Also write logs to a daily-rotated file in this directory.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a monthly Lichess dump.
    Download {
        #[arg(long)]
        year: u16,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=12))]
        month: u8,
    },
    /// Index a corpus into its ingest store, replacing any previous one.
    Index(IndexArgs),
    /// Compact an ingest store into a serving store.
    Compact(CompactArgs),
    /// Check a serving store against its ingest store.
    Verify(VerifyArgs),
    /// Show the corpora and stores under the data directory.
    Status,
    /// Download, index, compact and verify in one go.
    Build(IndexArgs),
    /// Look up one position.
    Query(QueryArgs),
}

/// Log to stderr, and additionally to `log_dir` when given.
///
/// The returned guard flushes the file writer and must outlive the program.
fn init_tracing(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "opening-explorer");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_deref())?;

    let layout = match cli.data_dir {
        Some(dir) => DataLayout::new(dir),
        None => DataLayout::from_env(),
    };
    tracing::debug!(data_dir = %layout.root().display(), "Using data directory");

    match cli.command {
        Commands::Download { year, month } => commands::run_download(&layout, year, month).await,
        Commands::Index(args) => commands::run_index(&layout, &args).await,
        Commands::Compact(args) => commands::run_compact(&layout, &args).await,
        Commands::Verify(args) => commands::run_verify(&layout, &args).await,
        Commands::Status => commands::run_status(&layout).await,
        Commands::Build(args) => commands::run_build(&layout, &args).await,
        Commands::Query(args) => commands::run_query(&layout, &args).await,
    }
}
