use std::io;

use super::movetext::tokenize_movetext;
use super::reader::{PgnReader, RawGame};
use crate::types::GameResult;

/// A game reduced to what the indexer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedGame {
    /// Mainline moves in SAN, in play order.
    pub moves: Vec<String>,
    pub result: GameResult,
    /// Mean of the two player ratings when both are known.
    pub average_rating: Option<u32>,
}

/// Game-level filters applied while parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameFilter {
    /// Drop games whose average rating is below this (or unknown).
    pub min_rating: Option<u32>,
    /// Stop after this many accepted games.
    pub max_games: Option<u64>,
}

/// Why a raw game was not turned into a [`ParsedGame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    UnknownResult,
    BelowMinRating,
}

/// Interpret one raw game, applying the rating filter.
///
/// The result comes from the `Result` tag, falling back to the termination
/// marker at the end of the movetext.
pub fn parse_game(raw: &RawGame, filter: &GameFilter) -> Result<ParsedGame, SkipReason> {
    let result = raw
        .header("Result")
        .and_then(GameResult::from_pgn)
        .or_else(|| {
            raw.movetext
                .split_whitespace()
                .last()
                .and_then(GameResult::from_pgn)
        })
        .ok_or(SkipReason::UnknownResult)?;

    let average_rating = average_rating(raw.header("WhiteElo"), raw.header("BlackElo"));

    if let Some(min) = filter.min_rating {
        match average_rating {
            Some(avg) if avg >= min => {}
            _ => return Err(SkipReason::BelowMinRating),
        }
    }

    Ok(ParsedGame {
        moves: tokenize_movetext(&raw.movetext),
        result,
        average_rating,
    })
}

fn average_rating(white: Option<&str>, black: Option<&str>) -> Option<u32> {
    let white: u32 = white?.trim().parse().ok()?;
    let black: u32 = black?.trim().parse().ok()?;
    u32::try_from((u64::from(white) + u64::from(black)) / 2).ok()
}

/// Lazily parse every acceptable game in `text`.
///
/// Skipped games are silently dropped; iteration stops once
/// `filter.max_games` games have been produced. Each call starts over from
/// the beginning of `text`.
pub fn parse_games<'a>(
    text: &'a str,
    filter: &'a GameFilter,
) -> impl Iterator<Item = ParsedGame> + 'a {
    let limit = filter.max_games.unwrap_or(u64::MAX);
    PgnReader::new(text.as_bytes())
        .map_while(|game: io::Result<RawGame>| game.ok())
        .filter_map(move |raw| parse_game(&raw, filter).ok())
        .take(usize::try_from(limit).unwrap_or(usize::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(result: Option<&str>, white: Option<&str>, black: Option<&str>, movetext: &str) -> RawGame {
        let mut headers = Vec::new();
        if let Some(r) = result {
            headers.push(("Result".to_string(), r.to_string()));
        }
        if let Some(w) = white {
            headers.push(("WhiteElo".to_string(), w.to_string()));
        }
        if let Some(b) = black {
            headers.push(("BlackElo".to_string(), b.to_string()));
        }
        RawGame {
            headers,
            movetext: movetext.to_string(),
        }
    }

    #[test]
    fn test_maps_result_tags() {
        let filter = GameFilter::default();
        let g = parse_game(&raw(Some("1-0"), None, None, "1. e4 1-0"), &filter).unwrap();
        assert_eq!(g.result, GameResult::WhiteWins);
        let g = parse_game(&raw(Some("1/2-1/2"), None, None, "1. e4 1/2-1/2"), &filter).unwrap();
        assert_eq!(g.result, GameResult::Draw);
        assert_eq!(
            parse_game(&raw(Some("*"), None, None, "1. e4 *"), &filter),
            Err(SkipReason::UnknownResult)
        );
    }

    #[test]
    fn test_result_falls_back_to_termination_marker() {
        let g = parse_game(&raw(None, None, None, "1. d4 d5 0-1"), &GameFilter::default()).unwrap();
        assert_eq!(g.result, GameResult::BlackWins);
        assert_eq!(g.moves, vec!["d4", "d5"]);
        assert_eq!(
            parse_game(&raw(None, None, None, "1. d4 d5"), &GameFilter::default()),
            Err(SkipReason::UnknownResult)
        );
    }

    #[test]
    fn test_average_rating_requires_both_numeric() {
        let filter = GameFilter::default();
        let g = parse_game(&raw(Some("1-0"), Some("2000"), Some("2101"), "1-0"), &filter).unwrap();
        assert_eq!(g.average_rating, Some(2050));
        let g = parse_game(&raw(Some("1-0"), Some("2000"), Some("?"), "1-0"), &filter).unwrap();
        assert_eq!(g.average_rating, None);
        let g = parse_game(&raw(Some("1-0"), Some("2000"), None, "1-0"), &filter).unwrap();
        assert_eq!(g.average_rating, None);
    }

    #[test]
    fn test_average_rating_of_extreme_ratings() {
        let max = u32::MAX.to_string();
        let g = parse_game(&raw(Some("1-0"), Some(&max), Some(&max), "1-0"), &GameFilter::default())
            .unwrap();
        assert_eq!(g.average_rating, Some(u32::MAX));
        let g = parse_game(&raw(Some("1-0"), Some(&max), Some("1"), "1-0"), &GameFilter::default())
            .unwrap();
        assert_eq!(g.average_rating, Some(u32::MAX / 2 + 1));
    }

    #[test]
    fn test_min_rating_filter() {
        let filter = GameFilter {
            min_rating: Some(2000),
            max_games: None,
        };
        assert!(parse_game(&raw(Some("1-0"), Some("2100"), Some("1950"), "1-0"), &filter).is_ok());
        assert_eq!(
            parse_game(&raw(Some("1-0"), Some("1500"), Some("1600"), "1-0"), &filter),
            Err(SkipReason::BelowMinRating)
        );
        assert_eq!(
            parse_game(&raw(Some("1-0"), None, None, "1-0"), &filter),
            Err(SkipReason::BelowMinRating)
        );
    }

    #[test]
    fn test_parse_games_is_lazy_and_capped() {
        let text = "[Result \"1-0\"]\n\n1. e4 1-0\n\n[Result \"*\"]\n\n1. c4 *\n\n[Result \"0-1\"]\n\n1. d4 0-1\n\n[Result \"1/2-1/2\"]\n\n1. Nf3 1/2-1/2\n";
        let all = GameFilter::default();
        let games: Vec<ParsedGame> = parse_games(text, &all).collect();
        assert_eq!(games.len(), 3);
        assert_eq!(games[1].moves, vec!["d4"]);

        let capped = GameFilter {
            min_rating: None,
            max_games: Some(2),
        };
        let games: Vec<ParsedGame> = parse_games(text, &capped).collect();
        assert_eq!(games.len(), 2);
        // Restartable: a second call starts from the top again.
        assert_eq!(parse_games(text, &capped).count(), 2);
    }
}
