//! Runtime tunables for the operator CLI.
//!
//! Storage and pipeline settings live in [`explorer::config`]; this module
//! only adds what the download step needs.

/// Default base URL of the Lichess monthly database dumps.
const DEFAULT_DOWNLOAD_BASE_URL: &str = "https://database.lichess.org/standard";

/// Default number of bytes between download progress log lines.
const DEFAULT_DOWNLOAD_PROGRESS_BYTES: u64 = 256 * 1024 * 1024;

/// Get the base URL monthly dumps are fetched from.
///
/// Priority:
/// 1. `OPENING_EXPLORER_DOWNLOAD_URL` env variable if set
/// 2. `https://database.lichess.org/standard` as fallback
pub fn get_download_base_url() -> String {
    if let Ok(url) = std::env::var("OPENING_EXPLORER_DOWNLOAD_URL") {
        return url.trim_end_matches('/').to_string();
    }

    DEFAULT_DOWNLOAD_BASE_URL.to_string()
}

/// Get the number of bytes between download progress reports.
pub fn get_download_progress_bytes() -> u64 {
    if let Ok(bytes) = std::env::var("OPENING_EXPLORER_DOWNLOAD_PROGRESS_BYTES") {
        return bytes.parse().unwrap_or(DEFAULT_DOWNLOAD_PROGRESS_BYTES);
    }

    DEFAULT_DOWNLOAD_PROGRESS_BYTES
}
