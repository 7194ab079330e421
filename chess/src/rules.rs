//! Move application on top of cozy-chess.
//!
//! The FEN-level functions are the narrow rules-engine interface used by
//! callers that only hold position strings; the board-level helpers are
//! what the hot replay loop uses to avoid FEN round trips.

use cozy_chess::{Board, Move};

use crate::converters::{format_piece, format_square};
use crate::fen::{format_fen, parse_fen, FenError};
use crate::pgn::san::{format_san, parse_san, SanError};
use crate::uci::{looks_like_uci, parse_uci_move, to_uci, UciError};

/// Result of applying one move to a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMove {
    /// FEN after the move.
    pub fen: String,
    pub from: String,
    /// Destination square; the king's destination for castling.
    pub to: String,
    pub promotion: Option<char>,
    /// Canonical UCI code.
    pub uci: String,
    pub san: String,
}

/// All legal moves on `board`, in cozy-chess encoding.
pub fn legal_move_list(board: &Board) -> Vec<Move> {
    let mut moves = Vec::new();
    board.generate_moves(|mvs| {
        moves.extend(mvs);
        false
    });
    moves
}

/// Resolve SAN or UCI text to a legal move on `board`.
pub fn resolve_move(board: &Board, move_text: &str) -> Result<Move, RulesError> {
    let text = move_text.trim();
    if looks_like_uci(text) {
        return Ok(parse_uci_move(board, text)?);
    }
    Ok(parse_san(board, text)?)
}

/// Apply `move_text` (SAN or UCI) to the position in `fen`.
pub fn apply_move(fen: &str, move_text: &str) -> Result<AppliedMove, RulesError> {
    let mut board = parse_fen(fen)?;
    let mv = resolve_move(&board, move_text)?;

    let uci = to_uci(&board, mv);
    let san = format_san(&board, mv);
    board.play_unchecked(mv);

    Ok(AppliedMove {
        fen: format_fen(&board),
        from: format_square(mv.from),
        to: uci[2..4].to_string(),
        promotion: mv.promotion.map(format_piece),
        uci,
        san,
    })
}

/// Legal moves of the position in `fen` as canonical UCI codes.
pub fn legal_moves(fen: &str) -> Result<Vec<String>, RulesError> {
    let board = parse_fen(fen)?;
    Ok(legal_move_list(&board)
        .into_iter()
        .map(|mv| to_uci(&board, mv))
        .collect())
}

/// SAN for the UCI code `uci` in the position `fen`.
pub fn san_for_uci(fen: &str, uci: &str) -> Result<String, RulesError> {
    let board = parse_fen(fen)?;
    uci_to_san(&board, uci)
}

/// Board-level form of [`san_for_uci`].
pub fn uci_to_san(board: &Board, uci: &str) -> Result<String, RulesError> {
    let mv = parse_uci_move(board, uci)?;
    Ok(format_san(board, mv))
}

#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error("FEN error: {0}")]
    Fen(#[from] FenError),
    #[error("SAN error: {0}")]
    San(#[from] SanError),
    #[error("UCI error: {0}")]
    Uci(#[from] UciError),
}

impl RulesError {
    /// True when the move text was well-formed but not legal here.
    pub fn is_illegal_move(&self) -> bool {
        matches!(
            self,
            Self::San(SanError::NoLegalMove(_) | SanError::AmbiguousMove(_))
                | Self::Uci(UciError::IllegalMove(_))
        )
    }
}
