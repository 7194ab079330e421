//! PGN game-source parsing.
//!
//! [`reader`] splits a raw byte stream into per-game header/movetext blocks,
//! [`movetext`] reduces a movetext block to its mainline SAN tokens, and
//! [`parser`] turns both into [`ParsedGame`]s with filtering applied.

pub mod movetext;
pub mod parser;
pub mod reader;
pub mod san;

pub use movetext::tokenize_movetext;
pub use parser::{parse_game, parse_games, GameFilter, ParsedGame, SkipReason};
pub use reader::{AsyncPgnReader, GameAssembler, PgnError, PgnReader, RawGame};
pub use san::{format_san, parse_san, SanError};
