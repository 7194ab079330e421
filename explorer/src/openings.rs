//! Opening names keyed by canonical position.

use std::collections::HashMap;
use std::path::Path;

use chess::pgn::tokenize_movetext;
use chess::{canonical_fen, parse_san};
use cozy_chess::Board;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Opening {
    pub eco: String,
    pub name: String,
}

/// Resolves a canonical FEN to the opening it belongs to.
pub trait OpeningLookup: Send + Sync {
    fn lookup(&self, canonical_fen: &str) -> Option<Opening>;
}

#[derive(Debug, thiserror::Error)]
pub enum OpeningError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Line {line}: {message}")]
    Parse { line: usize, message: String },
}

const BUILTIN: &[(&str, &str, &str)] = &[
    ("A00", "Hungarian Opening", "g3"),
    ("A04", "Zukertort Opening", "Nf3"),
    ("A10", "English Opening", "c4"),
    ("A40", "Queen's Pawn Game", "d4"),
    ("A45", "Indian Defense", "d4 Nf6"),
    ("A80", "Dutch Defense", "d4 f5"),
    ("B00", "King's Pawn Game", "e4"),
    ("B01", "Scandinavian Defense", "e4 d5"),
    ("B02", "Alekhine Defense", "e4 Nf6"),
    ("B06", "Modern Defense", "e4 g6"),
    ("B07", "Pirc Defense", "e4 d6"),
    ("B10", "Caro-Kann Defense", "e4 c6"),
    ("B20", "Sicilian Defense", "e4 c5"),
    ("B90", "Sicilian Defense: Najdorf Variation", "e4 c5 Nf3 d6 d4 cxd4 Nxd4 Nf6 Nc3 a6"),
    ("C00", "French Defense", "e4 e6"),
    ("C20", "King's Pawn Game", "e4 e5"),
    ("C40", "King's Knight Opening", "e4 e5 Nf3"),
    ("C44", "King's Knight Opening: Normal Variation", "e4 e5 Nf3 Nc6"),
    ("C50", "Italian Game", "e4 e5 Nf3 Nc6 Bc4"),
    ("C60", "Ruy Lopez", "e4 e5 Nf3 Nc6 Bb5"),
    ("C42", "Petrov's Defense", "e4 e5 Nf3 Nf6"),
    ("C45", "Scotch Game", "e4 e5 Nf3 Nc6 d4"),
    ("C30", "King's Gambit", "e4 e5 f4"),
    ("D00", "Queen's Pawn Game", "d4 d5"),
    ("D06", "Queen's Gambit", "d4 d5 c4"),
    ("D20", "Queen's Gambit Accepted", "d4 d5 c4 dxc4"),
    ("D30", "Queen's Gambit Declined", "d4 d5 c4 e6"),
    ("D10", "Slav Defense", "d4 d5 c4 c6"),
    ("E60", "King's Indian Defense", "d4 Nf6 c4 g6"),
    ("E20", "Nimzo-Indian Defense", "d4 Nf6 c4 e6 Nc3 Bb4"),
    ("E00", "Indian Defense", "d4 Nf6 c4 e6"),
];

/// In-memory opening table.
#[derive(Debug, Clone, Default)]
pub struct OpeningBook {
    by_position: HashMap<String, Opening>,
}

impl OpeningBook {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A small table of well-known openings.
    pub fn builtin() -> Self {
        let mut book = Self::empty();
        for (eco, name, line) in BUILTIN {
            if let Err(e) = book.insert_line(eco, name, line) {
                tracing::warn!(eco, name, error = %e, "Skipping built-in opening");
            }
        }
        book
    }

    /// Load a `eco<TAB>name<TAB>pgn` file in the Lichess `chess-openings`
    /// format. A header row is skipped.
    pub fn load_tsv(path: &Path) -> Result<Self, OpeningError> {
        let text = std::fs::read_to_string(path)?;
        let mut book = Self::empty();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || (i == 0 && line.starts_with("eco\t")) {
                continue;
            }
            let mut fields = line.splitn(3, '\t');
            let (Some(eco), Some(name), Some(pgn)) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(OpeningError::Parse {
                    line: i + 1,
                    message: "expected three tab-separated fields".into(),
                });
            };
            book.insert_line(eco, name, pgn)
                .map_err(|message| OpeningError::Parse { line: i + 1, message })?;
        }
        tracing::info!(path = %path.display(), openings = book.len(), "Loaded opening table");
        Ok(book)
    }

    /// Register the position reached by `movetext` under `eco`/`name`.
    pub fn insert_line(&mut self, eco: &str, name: &str, movetext: &str) -> Result<(), String> {
        let mut board = Board::default();
        for san in tokenize_movetext(movetext) {
            let mv = parse_san(&board, &san).map_err(|e| e.to_string())?;
            board.play_unchecked(mv);
        }
        self.by_position.insert(
            canonical_fen(&board),
            Opening {
                eco: eco.to_string(),
                name: name.to_string(),
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.by_position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_position.is_empty()
    }
}

impl OpeningLookup for OpeningBook {
    fn lookup(&self, canonical_fen: &str) -> Option<Opening> {
        self.by_position.get(canonical_fen).cloned()
    }
}
