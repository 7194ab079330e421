//! Fetching monthly Lichess dumps.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::config;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Invalid month {0}; expected 1-12")]
    InvalidMonth(u8),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server returned {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// File name Lichess publishes the dump for `year`/`month` under.
pub fn dump_file_name(year: u16, month: u8) -> String {
    format!("lichess_db_standard_rated_{year:04}-{month:02}.pgn.zst")
}

pub fn dump_url(base_url: &str, year: u16, month: u8) -> String {
    format!("{base_url}/{}", dump_file_name(year, month))
}

/// Path the dump for `year`/`month` is stored at.
pub fn dump_path(downloads_dir: &Path, year: u16, month: u8) -> PathBuf {
    downloads_dir.join(dump_file_name(year, month))
}

/// Download the dump for `year`/`month` into `downloads_dir`.
///
/// An existing complete file is reused. The body is streamed to a `.part`
/// file that is renamed into place only once fully written.
#[tracing::instrument(skip(downloads_dir))]
pub async fn download_dump(
    downloads_dir: &Path,
    year: u16,
    month: u8,
) -> Result<PathBuf, DownloadError> {
    if !(1..=12).contains(&month) {
        return Err(DownloadError::InvalidMonth(month));
    }

    let dest = dump_path(downloads_dir, year, month);
    if dest.exists() {
        tracing::info!(path = %dest.display(), "Dump already downloaded");
        return Ok(dest);
    }
    tokio::fs::create_dir_all(downloads_dir).await?;

    let url = dump_url(&config::get_download_base_url(), year, month);
    tracing::info!(%url, "Downloading dump");

    let mut response = reqwest::Client::new().get(&url).send().await?;
    if !response.status().is_success() {
        return Err(DownloadError::Status {
            url,
            status: response.status().as_u16(),
        });
    }
    let expected = response.content_length();

    let partial = dest.with_extension("zst.part");
    let mut file = tokio::fs::File::create(&partial).await?;
    let report_every = config::get_download_progress_bytes().max(1);
    let mut written = 0u64;
    let mut next_report = report_every;

    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        if written >= next_report {
            tracing::info!(written_mb = written / (1024 * 1024), total = ?expected, "Download progress");
            next_report += report_every;
        }
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&partial, &dest).await?;
    tracing::info!(path = %dest.display(), bytes = written, "Download complete");
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_names() {
        assert_eq!(
            dump_file_name(2024, 1),
            "lichess_db_standard_rated_2024-01.pgn.zst"
        );
        assert_eq!(
            dump_url("https://example.org/standard", 2013, 12),
            "https://example.org/standard/lichess_db_standard_rated_2013-12.pgn.zst"
        );
    }

    #[tokio::test]
    async fn test_existing_dump_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dump_path(dir.path(), 2024, 3);
        std::fs::write(&path, b"already here").unwrap();

        let got = download_dump(dir.path(), 2024, 3).await.unwrap();
        assert_eq!(got, path);
        assert_eq!(std::fs::read(&path).unwrap(), b"already here");
    }

    #[tokio::test]
    async fn test_invalid_month_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            download_dump(dir.path(), 2024, 13).await,
            Err(DownloadError::InvalidMonth(13))
        ));
    }
}
