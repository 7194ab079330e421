//! Game replay into per-ply index updates.

use chess::pgn::ParsedGame;
use chess::{parse_san, to_uci};
use cozy_chess::Board;

use crate::hasher::PositionHash;
use crate::records::PositionUpdate;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Stop replay after this many plies.
    pub max_ply: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedGame {
    pub updates: Vec<PositionUpdate>,
    /// Replay stopped early because a move was not legal.
    pub truncated: bool,
}

/// Replay `game` from the standard start, emitting one update per ply.
///
/// Each update carries the hash of the position *before* the move. An
/// illegal or unparseable move ends replay at that ply; the updates already
/// produced are kept. The final position of the game is not recorded.
pub fn process_game(game: &ParsedGame, options: &ProcessOptions) -> ProcessedGame {
    let limit = options.max_ply.unwrap_or(usize::MAX);
    let mut board = Board::default();
    let mut processed = ProcessedGame {
        updates: Vec::with_capacity(game.moves.len().min(limit)),
        truncated: false,
    };

    for (ply, san) in game.moves.iter().enumerate() {
        if ply >= limit {
            break;
        }

        let mv = match parse_san(&board, san) {
            Ok(mv) => mv,
            Err(e) => {
                tracing::debug!(ply, san = %san, error = %e, "Stopping replay at unplayable move");
                processed.truncated = true;
                break;
            }
        };

        processed.updates.push(PositionUpdate {
            position: PositionHash::of_board(&board),
            uci: to_uci(&board, mv),
            result: game.result,
            rating: game.average_rating,
        });
        board.play_unchecked(mv);
    }

    processed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess::GameResult;

    fn game(moves: &[&str]) -> ParsedGame {
        ParsedGame {
            moves: moves.iter().map(|m| m.to_string()).collect(),
            result: GameResult::Draw,
            average_rating: Some(1800),
        }
    }

    #[test]
    fn test_one_update_per_ply_with_pre_move_hash() {
        let processed = process_game(&game(&["e4", "e5", "Nf3"]), &ProcessOptions::default());
        assert!(!processed.truncated);
        assert_eq!(processed.updates.len(), 3);

        let first = &processed.updates[0];
        assert_eq!(first.position, PositionHash::of_board(&Board::default()));
        assert_eq!(first.uci, "e2e4");
        assert_eq!(first.result, GameResult::Draw);
        assert_eq!(first.rating, Some(1800));
        assert_eq!(processed.updates[2].uci, "g1f3");
    }

    #[test]
    fn test_empty_game_yields_nothing() {
        let processed = process_game(&game(&[]), &ProcessOptions::default());
        assert!(processed.updates.is_empty());
        assert!(!processed.truncated);
    }

    #[test]
    fn test_illegal_sixth_move_keeps_first_five() {
        let processed = process_game(
            &game(&["e4", "e5", "Nf3", "Nc6", "Bb5", "Ke3", "a6"]),
            &ProcessOptions::default(),
        );
        assert_eq!(processed.updates.len(), 5);
        assert!(processed.truncated);
    }

    #[test]
    fn test_max_ply_cap() {
        let options = ProcessOptions { max_ply: Some(2) };
        let processed = process_game(&game(&["e4", "e5", "Nf3", "Nc6"]), &options);
        assert_eq!(processed.updates.len(), 2);
        assert!(!processed.truncated);
    }

    #[test]
    fn test_castling_and_promotion_codes() {
        let castle = process_game(
            &game(&["e4", "e5", "Nf3", "Nc6", "Bc4", "Bc5", "O-O"]),
            &ProcessOptions::default(),
        );
        assert_eq!(castle.updates[6].uci, "e1g1");

        let promo = process_game(
            &game(&["h4", "g5", "hxg5", "h6", "gxh6", "Nf6", "h7", "Ng8", "hxg8=Q"]),
            &ProcessOptions::default(),
        );
        assert!(!promo.truncated);
        assert_eq!(promo.updates[8].uci, "h7g8q");
    }
}
