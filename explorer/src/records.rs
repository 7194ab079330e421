//! Binary record layout shared by both store tiers.
//!
//! Keys are tagged so that every position record sorts before every move
//! record, and all moves of one position are contiguous:
//!
//! | Record   | Key                              | Value                                          |
//! |----------|----------------------------------|------------------------------------------------|
//! | Position | `0x01 ‖ hash(16, BE)`            | `white ‖ draws ‖ black` (3 × u64 LE)           |
//! | Move     | `0x02 ‖ hash(16, BE) ‖ uci`      | `white ‖ draws ‖ black ‖ rating_sum ‖ rated`   |

use chess::GameResult;
use serde::Serialize;

use crate::hasher::PositionHash;

pub const POSITION_TAG: u8 = 0x01;
pub const MOVE_TAG: u8 = 0x02;

pub const POSITION_KEY_LEN: usize = 1 + PositionHash::LEN;
pub const POSITION_VALUE_LEN: usize = 24;
pub const MOVE_VALUE_LEN: usize = 40;

/// One ply's contribution to the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionUpdate {
    /// Hash of the position before the move.
    pub position: PositionHash,
    /// Canonical UCI code of the move played.
    pub uci: String,
    pub result: GameResult,
    pub rating: Option<u32>,
}

/// Which kind of record a key holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Position,
    Move,
}

impl RecordKind {
    pub fn of_key(key: &[u8]) -> Option<Self> {
        match key.first() {
            Some(&POSITION_TAG) if key.len() == POSITION_KEY_LEN => Some(Self::Position),
            Some(&MOVE_TAG) if key.len() > POSITION_KEY_LEN => Some(Self::Move),
            _ => None,
        }
    }
}

pub fn position_key(hash: PositionHash) -> Vec<u8> {
    let mut key = Vec::with_capacity(POSITION_KEY_LEN);
    key.push(POSITION_TAG);
    key.extend_from_slice(&hash.to_bytes());
    key
}

/// Prefix shared by every move of `hash`.
pub fn move_prefix(hash: PositionHash) -> Vec<u8> {
    let mut key = Vec::with_capacity(POSITION_KEY_LEN + 5);
    key.push(MOVE_TAG);
    key.extend_from_slice(&hash.to_bytes());
    key
}

pub fn move_key(hash: PositionHash, uci: &str) -> Vec<u8> {
    let mut key = move_prefix(hash);
    key.extend_from_slice(uci.as_bytes());
    key
}

/// UCI suffix of a move key.
pub fn uci_of_move_key(key: &[u8]) -> Option<&str> {
    if RecordKind::of_key(key) != Some(RecordKind::Move) {
        return None;
    }
    std::str::from_utf8(&key[POSITION_KEY_LEN..]).ok()
}

/// Outcome counters for one position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PositionStats {
    pub white: u64,
    pub draws: u64,
    pub black: u64,
}

impl PositionStats {
    pub fn total(&self) -> u64 {
        self.white + self.draws + self.black
    }

    pub fn record(&mut self, result: GameResult) {
        match result {
            GameResult::WhiteWins => self.white += 1,
            GameResult::Draw => self.draws += 1,
            GameResult::BlackWins => self.black += 1,
        }
    }

    pub fn merge(&mut self, other: &Self) {
        self.white += other.white;
        self.draws += other.draws;
        self.black += other.black;
    }

    pub fn encode(&self) -> [u8; POSITION_VALUE_LEN] {
        let mut out = [0u8; POSITION_VALUE_LEN];
        out[0..8].copy_from_slice(&self.white.to_le_bytes());
        out[8..16].copy_from_slice(&self.draws.to_le_bytes());
        out[16..24].copy_from_slice(&self.black.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != POSITION_VALUE_LEN {
            return None;
        }
        Some(Self {
            white: read_u64(bytes, 0),
            draws: read_u64(bytes, 8),
            black: read_u64(bytes, 16),
        })
    }
}

/// Outcome counters and rating aggregate for one (position, move).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveStats {
    pub white: u64,
    pub draws: u64,
    pub black: u64,
    pub rating_sum: u64,
    pub games_with_rating: u64,
}

impl MoveStats {
    pub fn games(&self) -> u64 {
        self.white + self.draws + self.black
    }

    pub fn average_rating(&self) -> Option<u32> {
        if self.games_with_rating == 0 {
            return None;
        }
        let avg = (self.rating_sum as f64 / self.games_with_rating as f64).round();
        Some(avg as u32)
    }

    pub fn record(&mut self, result: GameResult, rating: Option<u32>) {
        match result {
            GameResult::WhiteWins => self.white += 1,
            GameResult::Draw => self.draws += 1,
            GameResult::BlackWins => self.black += 1,
        }
        if let Some(rating) = rating {
            self.rating_sum += u64::from(rating);
            self.games_with_rating += 1;
        }
    }

    pub fn merge(&mut self, other: &Self) {
        self.white += other.white;
        self.draws += other.draws;
        self.black += other.black;
        self.rating_sum += other.rating_sum;
        self.games_with_rating += other.games_with_rating;
    }

    pub fn encode(&self) -> [u8; MOVE_VALUE_LEN] {
        let mut out = [0u8; MOVE_VALUE_LEN];
        out[0..8].copy_from_slice(&self.white.to_le_bytes());
        out[8..16].copy_from_slice(&self.draws.to_le_bytes());
        out[16..24].copy_from_slice(&self.black.to_le_bytes());
        out[24..32].copy_from_slice(&self.rating_sum.to_le_bytes());
        out[32..40].copy_from_slice(&self.games_with_rating.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != MOVE_VALUE_LEN {
            return None;
        }
        Some(Self {
            white: read_u64(bytes, 0),
            draws: read_u64(bytes, 8),
            black: read_u64(bytes, 16),
            rating_sum: read_u64(bytes, 24),
            games_with_rating: read_u64(bytes, 32),
        })
    }
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering_groups_positions_then_moves() {
        let low = PositionHash::from_bytes([0u8; 16]);
        let high = PositionHash::from_bytes([0xff; 16]);

        let mut keys = vec![
            move_key(low, "e2e4"),
            position_key(high),
            move_key(high, "a2a3"),
            position_key(low),
            move_key(low, "d2d4"),
        ];
        keys.sort();

        assert_eq!(keys[0], position_key(low));
        assert_eq!(keys[1], position_key(high));
        assert_eq!(keys[2], move_key(low, "d2d4"));
        assert_eq!(keys[3], move_key(low, "e2e4"));
        assert!(keys[2].starts_with(&move_prefix(low)));
        assert!(keys[3].starts_with(&move_prefix(low)));
    }

    #[test]
    fn test_record_kind_and_uci_extraction() {
        let hash = PositionHash::from_bytes([7u8; 16]);
        assert_eq!(RecordKind::of_key(&position_key(hash)), Some(RecordKind::Position));
        let key = move_key(hash, "e7e8q");
        assert_eq!(RecordKind::of_key(&key), Some(RecordKind::Move));
        assert_eq!(uci_of_move_key(&key), Some("e7e8q"));
        assert_eq!(RecordKind::of_key(&[0x03, 1, 2]), None);
        assert_eq!(RecordKind::of_key(&move_prefix(hash)), None);
    }

    #[test]
    fn test_move_stats_accumulate_ratings() {
        let mut stats = MoveStats::default();
        stats.record(GameResult::WhiteWins, Some(2000));
        stats.record(GameResult::Draw, Some(2101));
        stats.record(GameResult::BlackWins, None);
        assert_eq!(stats.games(), 3);
        assert_eq!(stats.games_with_rating, 2);
        assert_eq!(stats.average_rating(), Some(2051));

        let decoded = MoveStats::decode(&stats.encode()).unwrap();
        assert_eq!(decoded, stats);
        assert!(MoveStats::decode(&[0u8; 24]).is_none());
        assert_eq!(MoveStats::default().average_rating(), None);
    }

    #[test]
    fn test_position_stats_merge() {
        let mut a = PositionStats::default();
        a.record(GameResult::WhiteWins);
        let mut b = PositionStats::default();
        b.record(GameResult::BlackWins);
        b.record(GameResult::Draw);
        a.merge(&b);
        assert_eq!(a, PositionStats { white: 1, draws: 1, black: 1 });
        assert_eq!(a.total(), 3);
        assert_eq!(PositionStats::decode(&a.encode()), Some(a));
    }
}
