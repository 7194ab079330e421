use cozy_chess::{Board, Piece, Square};

use crate::converters::format_square;

/// FEN of the standard starting position.
pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Parse a FEN string into a Board.
///
/// Four-field (EPD style) and five-field inputs are accepted; missing move
/// counters default to `0 1`.
pub fn parse_fen(fen: &str) -> Result<Board, FenError> {
    let mut parts: Vec<&str> = fen.split_whitespace().collect();
    match parts.len() {
        4 => parts.extend(["0", "1"]),
        5 => parts.push("1"),
        6 => {}
        _ => return Err(FenError::InvalidFormat),
    }

    if let Ok(board) = parts.join(" ").parse() {
        return Ok(board);
    }

    // Some producers always emit the en-passant square after a double push,
    // even when no capture is possible; retry without it.
    if parts[3] != "-" {
        parts[3] = "-";
        if let Ok(board) = parts.join(" ").parse() {
            return Ok(board);
        }
    }

    Err(FenError::InvalidBoardLayout)
}

/// Format a Board as a FEN string
pub fn format_fen(board: &Board) -> String {
    board.to_string()
}

/// Canonical form of a position: placement, side to move, castling rights
/// and en-passant target, without move counters.
///
/// The en-passant field is only kept when an en passant capture is actually
/// legal, so positions reached by different move orders compare equal.
pub fn canonical_fen(board: &Board) -> String {
    let full = board.to_string();
    let mut fields = full.split_whitespace();
    let placement = fields.next().unwrap_or("8/8/8/8/8/8/8/8");
    let side = fields.next().unwrap_or("w");
    let castling = fields.next().unwrap_or("-");

    let en_passant = legal_en_passant_square(board)
        .map(format_square)
        .unwrap_or_else(|| "-".to_string());

    format!("{} {} {} {}", placement, side, castling, en_passant)
}

/// Parse `fen` and return its canonical form.
pub fn canonicalize(fen: &str) -> Result<String, FenError> {
    parse_fen(fen).map(|board| canonical_fen(&board))
}

fn legal_en_passant_square(board: &Board) -> Option<Square> {
    let mut target = None;
    board.generate_moves(|mvs| {
        if mvs.piece != Piece::Pawn {
            return false;
        }
        for mv in mvs {
            if mv.from.file() != mv.to.file() && board.piece_on(mv.to).is_none() {
                target = Some(mv.to);
                return true;
            }
        }
        false
    });
    target
}

#[derive(Debug, thiserror::Error)]
pub enum FenError {
    #[error("Invalid FEN format")]
    InvalidFormat,
    #[error("Invalid board layout")]
    InvalidBoardLayout,
}
