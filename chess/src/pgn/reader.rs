//! Forward-only PGN block readers.
//!
//! A PGN stream is a sequence of games, each a header block (`[Tag "value"]`
//! lines) followed by a movetext block, separated by blank lines. Both
//! readers here pull one line at a time, so memory use is bounded by the
//! size of a single game regardless of corpus size.

use std::io::{self, BufRead};

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// One game's raw header tags and movetext, not yet interpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawGame {
    pub headers: Vec<(String, String)>,
    pub movetext: String,
}

impl RawGame {
    /// Value of the first header named `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.movetext.trim().is_empty()
    }
}

/// Line-driven state machine that reassembles games from PGN lines.
///
/// Shared by the blocking and async readers.
#[derive(Debug, Default)]
pub struct GameAssembler {
    current: RawGame,
    in_movetext: bool,
}

impl GameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; returns a game when this line completes one.
    pub fn push_line(&mut self, line: &str) -> Option<RawGame> {
        let line = line.trim_start_matches('\u{feff}').trim();

        if line.is_empty() {
            if self.in_movetext && !self.current.movetext.trim().is_empty() {
                return self.take();
            }
            if !self.current.headers.is_empty() {
                self.in_movetext = true;
            }
            return None;
        }

        // Escape lines.
        if line.starts_with('%') {
            return None;
        }

        if line.starts_with('[') && !line.starts_with("[%") {
            // A header after movetext means the blank separator was missing.
            // A header after a blank line ends a game that has no movetext.
            let ends_game = !self.current.movetext.trim().is_empty()
                || (self.in_movetext && !self.current.headers.is_empty());
            let finished = if ends_game { self.take() } else { None };
            if let Some(tag) = parse_header(line) {
                self.current.headers.push(tag);
            }
            return finished;
        }

        self.in_movetext = true;
        if !self.current.movetext.is_empty() {
            self.current.movetext.push('\n');
        }
        self.current.movetext.push_str(line);
        None
    }

    /// Flush whatever is buffered at end of input.
    pub fn finish(&mut self) -> Option<RawGame> {
        if self.current.is_empty() {
            self.current = RawGame::default();
            self.in_movetext = false;
            return None;
        }
        self.take()
    }

    fn take(&mut self) -> Option<RawGame> {
        self.in_movetext = false;
        Some(std::mem::take(&mut self.current))
    }
}

fn parse_header(line: &str) -> Option<(String, String)> {
    let inner = line.strip_prefix('[')?.trim_end().strip_suffix(']')?.trim();
    let (name, rest) = inner.split_once(char::is_whitespace)?;
    let rest = rest.trim();
    let value = rest.strip_prefix('"')?.strip_suffix('"')?;
    Some((name.to_string(), value.replace("\\\"", "\"").replace("\\\\", "\\")))
}

/// Blocking reader over any `BufRead`; yields games lazily.
pub struct PgnReader<R> {
    inner: R,
    assembler: GameAssembler,
    buf: Vec<u8>,
    done: bool,
}

impl<R: BufRead> PgnReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            assembler: GameAssembler::new(),
            buf: Vec::with_capacity(256),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for PgnReader<R> {
    type Item = io::Result<RawGame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            self.buf.clear();
            match self.inner.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.done = true;
                    return self.assembler.finish().map(Ok);
                }
                Ok(_) => {
                    let line = String::from_utf8_lossy(&self.buf);
                    if let Some(game) = self.assembler.push_line(&line) {
                        return Some(Ok(game));
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Async reader over a pull-based byte stream such as a decompressor's stdout.
pub struct AsyncPgnReader<R> {
    inner: R,
    assembler: GameAssembler,
    buf: Vec<u8>,
    lines_read: u64,
    done: bool,
}

impl<R: AsyncBufRead + Unpin> AsyncPgnReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            assembler: GameAssembler::new(),
            buf: Vec::with_capacity(256),
            lines_read: 0,
            done: false,
        }
    }

    /// Pull lines until the next complete game, or `None` at end of stream.
    pub async fn next_game(&mut self) -> Result<Option<RawGame>, PgnError> {
        if self.done {
            return Ok(None);
        }
        loop {
            self.buf.clear();
            let n = self
                .inner
                .read_until(b'\n', &mut self.buf)
                .await
                .map_err(|source| PgnError::Read {
                    line: self.lines_read + 1,
                    source,
                })?;
            if n == 0 {
                self.done = true;
                return Ok(self.assembler.finish());
            }
            self.lines_read += 1;
            let line = String::from_utf8_lossy(&self.buf);
            if let Some(game) = self.assembler.push_line(&line) {
                return Ok(Some(game));
            }
        }
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// True once the underlying stream has hit end of input.
    pub fn is_exhausted(&self) -> bool {
        self.done
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PgnError {
    #[error("Failed to read PGN at line {line}: {source}")]
    Read {
        line: u64,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_GAMES: &str = "[Event \"Rated Blitz\"]\n[White \"a\"]\n[Result \"1-0\"]\n\n1. e4 e5\n2. Nf3 1-0\n\n[Event \"Rated Blitz\"]\n[Result \"0-1\"]\n\n1. d4 d5 0-1\n";

    #[test]
    fn test_reads_games_between_blank_lines() {
        let games: Vec<RawGame> = PgnReader::new(TWO_GAMES.as_bytes())
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(games.len(), 2);
        assert_eq!(games[0].header("Result"), Some("1-0"));
        assert_eq!(games[0].header("White"), Some("a"));
        assert_eq!(games[0].movetext, "1. e4 e5\n2. Nf3 1-0");
        assert_eq!(games[1].movetext, "1. d4 d5 0-1");
    }

    #[test]
    fn test_missing_separator_and_crlf() {
        let text = "[Result \"1-0\"]\r\n\r\n1. e4 1-0\r\n[Result \"0-1\"]\r\n1. d4 0-1";
        let games: Vec<RawGame> = PgnReader::new(text.as_bytes())
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(games.len(), 2);
        assert_eq!(games[0].movetext, "1. e4 1-0");
        assert_eq!(games[1].header("Result"), Some("0-1"));
        assert_eq!(games[1].movetext, "1. d4 0-1");
    }

    #[test]
    fn test_header_only_game_stays_separate() {
        let text = "[Result \"1-0\"]\n\n\n[Result \"0-1\"]\n\n1. d4 0-1\n";
        let games: Vec<RawGame> = PgnReader::new(text.as_bytes())
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(games.len(), 2);
        assert_eq!(games[0].headers, vec![("Result".to_string(), "1-0".to_string())]);
        assert!(games[0].movetext.is_empty());
        assert_eq!(games[1].header("Result"), Some("0-1"));
        assert_eq!(games[1].headers.len(), 1);
        assert_eq!(games[1].movetext, "1. d4 0-1");
    }

    #[test]
    fn test_header_values_with_escapes_and_spaces() {
        let tag = parse_header("[Opening \"King's Pawn: \\\"Wayward\\\" Queen\"]").unwrap();
        assert_eq!(tag.0, "Opening");
        assert_eq!(tag.1, "King's Pawn: \"Wayward\" Queen");
        assert!(parse_header("[Broken").is_none());
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        assert_eq!(PgnReader::new("".as_bytes()).count(), 0);
        assert_eq!(PgnReader::new("\n\n\n".as_bytes()).count(), 0);
    }

    #[tokio::test]
    async fn test_async_reader_matches_blocking_reader() {
        let mut reader = AsyncPgnReader::new(TWO_GAMES.as_bytes());
        let mut games = Vec::new();
        while let Some(game) = reader.next_game().await.unwrap() {
            games.push(game);
        }
        let blocking: Vec<RawGame> = PgnReader::new(TWO_GAMES.as_bytes())
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(games, blocking);
        assert!(reader.lines_read() >= 9);
        assert!(reader.next_game().await.unwrap().is_none());
        assert!(reader.is_exhausted());
    }
}
