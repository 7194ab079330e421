//! Rules-engine layer over `cozy-chess`.
//!
//! Everything the indexer and the explorer need from chess rules lives here:
//! FEN parsing and canonicalisation, SAN and UCI move codes, move
//! application, and the PGN game-source reader.

pub mod converters;
pub mod fen;
pub mod pgn;
pub mod rules;
pub mod types;
pub mod uci;

pub use converters::*;
pub use fen::{canonical_fen, canonicalize, format_fen, parse_fen, FenError, STARTING_FEN};
pub use pgn::{format_san, parse_san, PgnError, SanError};
pub use rules::{
    apply_move, legal_move_list, legal_moves, resolve_move, san_for_uci, uci_to_san, AppliedMove,
    RulesError,
};
pub use types::GameResult;
pub use uci::{convert_uci_castling_to_cozy, format_uci_move, parse_uci_move, to_uci};
