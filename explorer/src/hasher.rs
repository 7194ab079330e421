//! Position identity.
//!
//! A position is identified by the xxh3-128 digest of its canonical FEN:
//! placement, side to move, castling rights and an en-passant square only
//! when a capture onto it is legal. Move counters never take part, so the
//! same position reached by different move orders hashes identically.

use std::fmt;

use chess::{canonical_fen, canonicalize, FenError};
use cozy_chess::Board;
use xxhash_rust::xxh3::xxh3_128;

/// 128-bit position identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionHash(u128);

impl PositionHash {
    pub const LEN: usize = 16;

    /// Hash an already canonical FEN string.
    pub fn of_canonical(canonical: &str) -> Self {
        Self(xxh3_128(canonical.as_bytes()))
    }

    pub fn of_board(board: &Board) -> Self {
        Self::of_canonical(&canonical_fen(board))
    }

    /// Canonicalise `fen` and hash it.
    pub fn of_fen(fen: &str) -> Result<Self, FenError> {
        Ok(Self::of_canonical(&canonicalize(fen)?))
    }

    /// Big-endian bytes, so byte order matches numeric order.
    pub fn to_bytes(self) -> [u8; Self::LEN] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(u128::from_be_bytes(bytes))
    }

    pub fn as_u128(self) -> u128 {
        self.0
    }
}

impl fmt::Display for PositionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}
