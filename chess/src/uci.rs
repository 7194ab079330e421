//! UCI move codes.
//!
//! The index stores moves as UCI coordinate strings ("e2e4", "e7e8q"), with
//! castling written as the king's own from/to squares ("e1g1"). cozy-chess
//! encodes castling as king-captures-rook ("e1h1"), so every conversion in
//! and out of the board goes through this module.

use cozy_chess::{Board, File, Move, Piece, Rank, Square};

use crate::converters::{format_piece, format_square, parse_piece, parse_square};
use crate::rules::legal_move_list;

/// Convert UCI castling notation to cozy_chess notation
///
/// UCI uses standard notation (king moves 2 squares): e1g1, e1c1, e8g8, e8c8
/// cozy_chess uses king-to-rook notation: e1h1, e1a1, e8h8, e8a8
///
/// The converted move is only returned if it is in `legal_moves`.
pub fn convert_uci_castling_to_cozy(mv: Move, legal_moves: &[Move]) -> Move {
    let is_rank_1_or_8 = matches!(mv.from.rank(), Rank::First | Rank::Eighth);
    let is_e_file = matches!(mv.from.file(), File::E);
    let is_g_or_c_file = matches!(mv.to.file(), File::G | File::C);

    if is_rank_1_or_8 && is_e_file && is_g_or_c_file && mv.promotion.is_none() {
        let target_square = match (mv.from.rank(), mv.to.file()) {
            (Rank::First, File::G) => Square::new(File::H, Rank::First),
            (Rank::First, File::C) => Square::new(File::A, Rank::First),
            (Rank::Eighth, File::G) => Square::new(File::H, Rank::Eighth),
            (Rank::Eighth, File::C) => Square::new(File::A, Rank::Eighth),
            _ => return mv,
        };

        let converted = Move {
            from: mv.from,
            to: target_square,
            promotion: None,
        };

        if legal_moves.contains(&converted) {
            return converted;
        }
    }

    mv
}

/// Format a move exactly as cozy-chess encodes it (e.g., "e2e4", "e7e8q").
///
/// Castling comes out as king-to-rook; use [`to_uci`] for the stored form.
pub fn format_uci_move(mv: Move) -> String {
    let mut s = format_square(mv.from);
    s.push_str(&format_square(mv.to));
    if let Some(promo) = mv.promotion {
        s.push(format_piece(promo));
    }
    s
}

/// True when `mv` is a castling move in cozy-chess encoding.
pub fn is_castling(board: &Board, mv: Move) -> bool {
    board.piece_on(mv.from) == Some(Piece::King)
        && board.piece_on(mv.to) == Some(Piece::Rook)
        && board.color_on(mv.to) == Some(board.side_to_move())
}

/// Canonical UCI code of a legal move on `board`.
pub fn to_uci(board: &Board, mv: Move) -> String {
    if is_castling(board, mv) {
        let file = if mv.to.file() as usize > mv.from.file() as usize {
            File::G
        } else {
            File::C
        };
        let king_to = Square::new(file, mv.from.rank());
        return format!("{}{}", format_square(mv.from), format_square(king_to));
    }
    format_uci_move(mv)
}

/// Parse a UCI code and resolve it to a legal cozy-chess move on `board`.
pub fn parse_uci_move(board: &Board, text: &str) -> Result<Move, UciError> {
    let text = text.trim();
    if !(4..=5).contains(&text.len()) || !text.is_ascii() {
        return Err(UciError::InvalidFormat(text.to_string()));
    }

    let from = parse_square(&text[0..2]).ok_or_else(|| UciError::InvalidFormat(text.to_string()))?;
    let to = parse_square(&text[2..4]).ok_or_else(|| UciError::InvalidFormat(text.to_string()))?;
    let promotion = match text[4..].chars().next() {
        Some(c) => match parse_piece(c) {
            Some(p @ (Piece::Knight | Piece::Bishop | Piece::Rook | Piece::Queen)) => Some(p),
            _ => return Err(UciError::InvalidFormat(text.to_string())),
        },
        None => None,
    };

    let legal = legal_move_list(board);
    let mv = convert_uci_castling_to_cozy(
        Move {
            from,
            to,
            promotion,
        },
        &legal,
    );

    if legal.contains(&mv) {
        Ok(mv)
    } else {
        Err(UciError::IllegalMove(text.to_string()))
    }
}

/// Cheap syntactic check used to tell UCI codes apart from SAN.
pub fn looks_like_uci(text: &str) -> bool {
    let b = text.as_bytes();
    (b.len() == 4 || b.len() == 5)
        && (b'a'..=b'h').contains(&b[0])
        && (b'1'..=b'8').contains(&b[1])
        && (b'a'..=b'h').contains(&b[2])
        && (b'1'..=b'8').contains(&b[3])
        && (b.len() == 4 || matches!(b[4], b'q' | b'r' | b'b' | b'n'))
}

#[derive(Debug, thiserror::Error)]
pub enum UciError {
    #[error("Invalid UCI move: {0}")]
    InvalidFormat(String),
    #[error("Illegal UCI move: {0}")]
    IllegalMove(String),
}
