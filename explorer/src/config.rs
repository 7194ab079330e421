//! Configuration for the opening explorer.
//!
//! Every setting has a compile-time default that an environment variable can
//! override. Command-line flags, where present, take precedence over both.

use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_DIR: &str = ".local/share/opening-explorer";
const DEV_DATA_DIR: &str = "./data";

pub const DEFAULT_BATCH_SIZE: usize = 5_000;
pub const DEFAULT_COMPACT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10_000;

pub const INGEST_DB_FILE: &str = "ingest.db";
pub const SERVING_DATA_FILE: &str = "data.oxt";

/// Data directory root.
///
/// Priority:
/// 1. OPENING_EXPLORER_DATA_DIR env variable if set
/// 2. $HOME/.local/share/opening-explorer if HOME is set
/// 3. ./data as fallback
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("OPENING_EXPLORER_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(DEFAULT_CONFIG_DIR);
    }

    PathBuf::from(DEV_DATA_DIR)
}

/// Updates per ingest transaction.
pub fn get_batch_size() -> usize {
    env_or("OPENING_EXPLORER_BATCH_SIZE", DEFAULT_BATCH_SIZE)
}

/// Entries per serving-store transaction during compaction.
pub fn get_compact_batch_size() -> usize {
    env_or("OPENING_EXPLORER_COMPACT_BATCH_SIZE", DEFAULT_COMPACT_BATCH_SIZE)
}

/// Games between progress reports.
pub fn get_progress_interval() -> u64 {
    env_or("OPENING_EXPLORER_PROGRESS_INTERVAL", DEFAULT_PROGRESS_INTERVAL)
}

/// Decompressor override, e.g. `pzstd` instead of `zstd`.
pub fn get_decompressor_override() -> Option<String> {
    std::env::var("OPENING_EXPLORER_DECOMPRESSOR")
        .ok()
        .filter(|s| !s.trim().is_empty())
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "Ignoring unparseable setting");
                default
            }
        },
        Err(_) => default,
    }
}

/// On-disk layout under a data directory.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_env() -> Self {
        Self::new(get_data_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    pub fn ingest_dir(&self, corpus: &str) -> PathBuf {
        self.root.join("ingest").join(corpus)
    }

    pub fn ingest_db(&self, corpus: &str) -> PathBuf {
        self.ingest_dir(corpus).join(INGEST_DB_FILE)
    }

    pub fn serving_dir(&self, corpus: &str) -> PathBuf {
        self.root.join("serving").join(corpus)
    }

    pub fn serving_file(&self, corpus: &str) -> PathBuf {
        self.serving_dir(corpus).join(SERVING_DATA_FILE)
    }
}

/// Corpus name for a monthly Lichess dump.
pub fn lichess_corpus(year: u16, month: u8) -> String {
    format!("lichess-{year:04}-{month:02}")
}

pub const CUSTOM_CORPUS: &str = "custom";
