//! Corpus sources: plain PGN files or compressed dumps piped through an
//! external decompressor.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chess::pgn::AsyncPgnReader;
use tokio::io::{AsyncRead, BufReader};
use tokio::process::{Child, Command};

use crate::config;
use crate::pipeline::PipelineError;

const READ_BUFFER_SIZE: usize = 256 * 1024;

type ByteStream = Box<dyn AsyncRead + Unpin + Send>;

pub type SourceStream = BufReader<ByteStream>;

/// Compression of a corpus file, decided by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zstd,
    Bzip2,
    Gzip,
}

impl Compression {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("zst") => Self::Zstd,
            Some("bz2") => Self::Bzip2,
            Some("gz") => Self::Gzip,
            _ => Self::None,
        }
    }

    /// Decompressor program that writes plain text to stdout with `-dc`.
    pub fn program(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Zstd => Some("zstd"),
            Self::Bzip2 => Some("bzip2"),
            Self::Gzip => Some("gzip"),
        }
    }
}

/// An open corpus, read lazily one game at a time.
pub struct GameSource {
    reader: AsyncPgnReader<SourceStream>,
    child: Option<(String, Child)>,
    path: PathBuf,
}

impl GameSource {
    /// Open `path`, spawning a decompressor when the extension calls for it.
    pub async fn open(path: &Path) -> Result<Self, PipelineError> {
        if !path.exists() {
            return Err(PipelineError::SourceNotFound(path.to_path_buf()));
        }

        let compression = Compression::from_path(path);
        let (stream, child) = match compression.program() {
            None => {
                let file = tokio::fs::File::open(path).await?;
                (Box::new(file) as ByteStream, None)
            }
            Some(default_program) => {
                let program =
                    config::get_decompressor_override().unwrap_or_else(|| default_program.to_string());
                tracing::info!(path = %path.display(), program = %program, "Spawning decompressor");

                let mut child = Command::new(&program)
                    .arg("-dc")
                    .arg(path)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|source| PipelineError::Spawn {
                        program: program.clone(),
                        source,
                    })?;

                let stdout = child.stdout.take().ok_or_else(|| PipelineError::Decompressor {
                    program: program.clone(),
                    status: "stdout unavailable".into(),
                })?;
                (Box::new(stdout) as ByteStream, Some((program, child)))
            }
        };

        Ok(Self {
            reader: AsyncPgnReader::new(BufReader::with_capacity(READ_BUFFER_SIZE, stream)),
            child,
            path: path.to_path_buf(),
        })
    }

    pub fn reader(&mut self) -> &mut AsyncPgnReader<SourceStream> {
        &mut self.reader
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the stream and reap the decompressor.
    ///
    /// After a full read the decompressor must exit cleanly. When reading
    /// stopped early the process is killed instead.
    pub async fn finish(self) -> Result<(), PipelineError> {
        let exhausted = self.reader.is_exhausted();
        drop(self.reader);

        let Some((program, mut child)) = self.child else {
            return Ok(());
        };

        if !exhausted {
            let _ = child.kill().await;
            return Ok(());
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(PipelineError::Decompressor {
                program,
                status: status.to_string(),
            });
        }
        Ok(())
    }
}
