use cozy_chess::{Board, File, Move, Piece, Rank, Square};

use crate::converters::{
    file_to_char, format_square, parse_file, parse_piece, parse_rank, parse_square,
    rank_to_char, san_piece_letter,
};
use crate::rules::legal_move_list;
use crate::uci::is_castling;

/// Parse Standard Algebraic Notation (SAN) move
///
/// Check and annotation suffixes (`+`, `#`, `!`, `?`) are ignored. Castling
/// is accepted as `O-O`/`O-O-O` or with zeros.
pub fn parse_san(board: &Board, san: &str) -> Result<Move, SanError> {
    let trimmed = san.trim_end_matches(['+', '#', '!', '?']);
    if trimmed.is_empty() {
        return Err(SanError::InvalidFormat(san.to_string()));
    }

    let legal = legal_move_list(board);

    match trimmed {
        "O-O" | "0-0" => return find_castle(board, &legal, true, san),
        "O-O-O" | "0-0-0" => return find_castle(board, &legal, false, san),
        _ => {}
    }

    let (body, promotion) = split_promotion(trimmed)?;

    let mut chars = body.chars().peekable();
    let piece = match chars.peek() {
        Some(c @ ('N' | 'B' | 'R' | 'Q' | 'K')) => {
            let p = parse_piece(*c).ok_or(SanError::InvalidFormat(san.to_string()))?;
            chars.next();
            p
        }
        _ => Piece::Pawn,
    };

    let rest: String = chars.filter(|c| *c != 'x' && *c != '-' && *c != ':').collect();
    if rest.len() < 2 || !rest.is_ascii() {
        return Err(SanError::InvalidFormat(san.to_string()));
    }
    let (disambiguation, dest) = rest.split_at(rest.len() - 2);
    let to = parse_square(dest).ok_or_else(|| SanError::InvalidSquare(dest.to_string()))?;

    let mut from_file: Option<File> = None;
    let mut from_rank: Option<Rank> = None;
    for c in disambiguation.chars() {
        if let Some(f) = parse_file(c) {
            from_file = Some(f);
        } else if let Some(r) = parse_rank(c) {
            from_rank = Some(r);
        } else {
            return Err(SanError::InvalidFormat(san.to_string()));
        }
    }

    let mut found: Option<Move> = None;
    for &mv in &legal {
        if mv.to != to
            || board.piece_on(mv.from) != Some(piece)
            || mv.promotion != promotion
            || is_castling(board, mv)
        {
            continue;
        }
        if from_file.is_some_and(|f| mv.from.file() != f)
            || from_rank.is_some_and(|r| mv.from.rank() != r)
        {
            continue;
        }
        if found.is_some() {
            return Err(SanError::AmbiguousMove(san.to_string()));
        }
        found = Some(mv);
    }

    found.ok_or_else(|| SanError::NoLegalMove(san.to_string()))
}

/// Format a legal move as SAN, including check and mate suffixes.
pub fn format_san(board: &Board, mv: Move) -> String {
    let mut san = String::with_capacity(8);

    if is_castling(board, mv) {
        if mv.to.file() as usize > mv.from.file() as usize {
            san.push_str("O-O");
        } else {
            san.push_str("O-O-O");
        }
    } else {
        let piece = board.piece_on(mv.from).unwrap_or(Piece::Pawn);
        let is_capture = board.piece_on(mv.to).is_some()
            || (piece == Piece::Pawn && mv.from.file() != mv.to.file());

        if piece == Piece::Pawn {
            if is_capture {
                san.push(file_to_char(mv.from.file()));
            }
        } else {
            san.push(san_piece_letter(piece));
            push_disambiguation(&mut san, board, mv, piece);
        }

        if is_capture {
            san.push('x');
        }
        san.push_str(&format_square(mv.to));

        if let Some(promo) = mv.promotion {
            san.push('=');
            san.push(san_piece_letter(promo));
        }
    }

    let mut after = board.clone();
    after.play_unchecked(mv);
    if !after.checkers().is_empty() {
        if legal_move_list(&after).is_empty() {
            san.push('#');
        } else {
            san.push('+');
        }
    }

    san
}

fn push_disambiguation(san: &mut String, board: &Board, mv: Move, piece: Piece) {
    let rivals: Vec<Square> = legal_move_list(board)
        .into_iter()
        .filter(|other| {
            other.to == mv.to
                && other.from != mv.from
                && board.piece_on(other.from) == Some(piece)
                && !is_castling(board, *other)
        })
        .map(|other| other.from)
        .collect();

    if rivals.is_empty() {
        return;
    }

    let shares_file = rivals.iter().any(|sq| sq.file() == mv.from.file());
    let shares_rank = rivals.iter().any(|sq| sq.rank() == mv.from.rank());

    if !shares_file {
        san.push(file_to_char(mv.from.file()));
    } else if !shares_rank {
        san.push(rank_to_char(mv.from.rank()));
    } else {
        san.push(file_to_char(mv.from.file()));
        san.push(rank_to_char(mv.from.rank()));
    }
}

fn split_promotion(text: &str) -> Result<(&str, Option<Piece>), SanError> {
    let (body, promo) = match text.split_once('=') {
        Some((body, promo)) => (body, Some(promo)),
        None => {
            // Tolerate "e8Q" without the equals sign.
            let bytes = text.as_bytes();
            let n = bytes.len();
            if n >= 3 && bytes[n - 2].is_ascii_digit() && matches!(bytes[n - 1], b'Q' | b'R' | b'B' | b'N')
            {
                (&text[..n - 1], Some(&text[n - 1..]))
            } else {
                (text, None)
            }
        }
    };

    let promotion = match promo {
        Some(p) => {
            let mut chars = p.chars();
            match (chars.next().and_then(parse_piece), chars.next()) {
                (Some(piece @ (Piece::Knight | Piece::Bishop | Piece::Rook | Piece::Queen)), None) => {
                    Some(piece)
                }
                _ => return Err(SanError::InvalidPromotion(p.to_string())),
            }
        }
        None => None,
    };

    Ok((body, promotion))
}

fn find_castle(board: &Board, legal: &[Move], kingside: bool, san: &str) -> Result<Move, SanError> {
    legal
        .iter()
        .copied()
        .find(|&mv| {
            is_castling(board, mv)
                && ((mv.to.file() as usize > mv.from.file() as usize) == kingside)
        })
        .ok_or_else(|| SanError::NoLegalMove(san.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum SanError {
    #[error("No legal move found for: {0}")]
    NoLegalMove(String),
    #[error("Ambiguous move: {0}")]
    AmbiguousMove(String),
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    #[error("Invalid square: {0}")]
    InvalidSquare(String),
    #[error("Invalid promotion: {0}")]
    InvalidPromotion(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fen::parse_fen;
    use crate::uci::{format_uci_move, to_uci};
    use proptest::prelude::*;

    fn play(board: &mut Board, san: &str) {
        let mv = parse_san(board, san).unwrap();
        board.play_unchecked(mv);
    }

    #[test]
    fn test_parse_pawn_and_piece_moves() {
        let board = Board::default();
        assert_eq!(format_uci_move(parse_san(&board, "e4").unwrap()), "e2e4");
        assert_eq!(format_uci_move(parse_san(&board, "Nf3").unwrap()), "g1f3");
        assert_eq!(format_uci_move(parse_san(&board, "Nf3!?").unwrap()), "g1f3");
    }

    #[test]
    fn test_parse_rejects_illegal() {
        let board = Board::default();
        assert!(matches!(parse_san(&board, "e5"), Err(SanError::NoLegalMove(_))));
        assert!(matches!(parse_san(&board, "Qh5"), Err(SanError::NoLegalMove(_))));
        assert!(matches!(parse_san(&board, "O-O"), Err(SanError::NoLegalMove(_))));
        assert!(parse_san(&board, "").is_err());
        assert!(parse_san(&board, "Zz9").is_err());
    }

    #[test]
    fn test_castling_both_notations() {
        let board = parse_fen("r3k2r/pppppppp/8/8/8/8/PPPPPPPP/R3K2R w KQkq - 0 1").unwrap();
        let short = parse_san(&board, "O-O").unwrap();
        assert_eq!(to_uci(&board, short), "e1g1");
        let long = parse_san(&board, "0-0-0").unwrap();
        assert_eq!(to_uci(&board, long), "e1c1");
        assert_eq!(format_san(&board, short), "O-O");
        assert_eq!(format_san(&board, long), "O-O-O");
    }

    #[test]
    fn test_promotion() {
        let board = parse_fen("8/4P3/8/8/8/8/k7/7K w - - 0 1").unwrap();
        let mv = parse_san(&board, "e8=Q").unwrap();
        assert_eq!(to_uci(&board, mv), "e7e8q");
        assert_eq!(format_san(&board, mv), "e8=Q");

        let under = parse_san(&board, "e8N").unwrap();
        assert_eq!(to_uci(&board, under), "e7e8n");
    }

    #[test]
    fn test_disambiguation() {
        // Knights on b1 and f3 can both reach d2.
        let board = parse_fen("4k3/8/8/8/8/5N2/8/1N2K3 w - - 0 1").unwrap();
        let mv = parse_san(&board, "Nbd2").unwrap();
        assert_eq!(format_uci_move(mv), "b1d2");
        assert_eq!(format_san(&board, mv), "Nbd2");
        assert!(matches!(parse_san(&board, "Nd2"), Err(SanError::AmbiguousMove(_))));
    }

    #[test]
    fn test_en_passant_and_mate_suffix() {
        let mut board = Board::default();
        for san in ["e4", "a6", "e5", "d5"] {
            play(&mut board, san);
        }
        let ep = parse_san(&board, "exd6").unwrap();
        assert_eq!(format_san(&board, ep), "exd6");

        let mut board = Board::default();
        for san in ["f3", "e5", "g4"] {
            play(&mut board, san);
        }
        let mate = parse_san(&board, "Qh4#").unwrap();
        assert_eq!(format_san(&board, mate), "Qh4#");
    }

    proptest! {
        #[test]
        fn prop_format_then_parse_is_identity(choices in proptest::collection::vec(0usize..256, 0..40)) {
            let mut board = Board::default();
            for choice in choices {
                let legal = legal_move_list(&board);
                if legal.is_empty() {
                    break;
                }
                let mv = legal[choice % legal.len()];
                let san = format_san(&board, mv);
                prop_assert_eq!(parse_san(&board, &san).unwrap(), mv);
                board.play_unchecked(mv);
            }
        }
    }
}
