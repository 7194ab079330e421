//! End-to-end: PGN text → ingest store → serving store → explorer queries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chess::pgn::AsyncPgnReader;
use chess::{apply_move, STARTING_FEN};
use explorer::{
    compact, index_games, verify_compaction, CompactOptions, Explorer, IndexOptions, IndexSummary,
    IngestStore, OpeningBook, PositionHash, QueryOptions, ServingStore, VerifyOptions,
};

fn game(moves: &str, result: &str, ratings: Option<(u32, u32)>) -> String {
    let mut pgn = format!("[Event \"Test\"]\n[Result \"{result}\"]\n");
    if let Some((white, black)) = ratings {
        pgn.push_str(&format!("[WhiteElo \"{white}\"]\n[BlackElo \"{black}\"]\n"));
    }
    pgn.push_str(&format!("\n{moves} {result}\n\n"));
    pgn
}

fn fen_after(moves: &[&str]) -> String {
    let mut fen = STARTING_FEN.to_string();
    for mv in moves {
        fen = apply_move(&fen, mv).unwrap().fen;
    }
    fen
}

struct Built {
    _dir: tempfile::TempDir,
    ingest: PathBuf,
    serving: PathBuf,
    summary: IndexSummary,
}

async fn build(pgn: &str) -> Built {
    let dir = tempfile::tempdir().unwrap();
    let ingest = dir.path().join("ingest").join("custom").join("ingest.db");
    let serving = dir.path().join("serving").join("custom");

    let store = IngestStore::open(&ingest).await.unwrap();
    let mut reader = AsyncPgnReader::new(pgn.as_bytes());
    let options = IndexOptions {
        batch_size: 3,
        ..IndexOptions::default()
    };
    let summary = index_games(&mut reader, &store, &options, |_| {}).await.unwrap();
    store.close().await;

    let report = compact(&ingest, &serving, &CompactOptions::default()).await;
    assert!(report.success, "compaction failed: {:?}", report.error);

    Built {
        _dir: dir,
        ingest,
        serving,
        summary,
    }
}

fn explorer_for(serving: &Path) -> Explorer {
    Explorer::new(serving, Arc::new(OpeningBook::builtin()))
}

fn ten_games() -> String {
    let mut pgn = String::new();
    for _ in 0..5 {
        pgn.push_str(&game("1. e4 e5 2. Nf3 Nc6", "1-0", Some((2000, 2000))));
    }
    for _ in 0..3 {
        pgn.push_str(&game("1. e4 c5", "1/2-1/2", Some((1800, 1600))));
    }
    for _ in 0..2 {
        pgn.push_str(&game("1. d4 d5", "0-1", None));
    }
    pgn
}

#[tokio::test]
async fn ten_game_scenario() {
    let built = build(&ten_games()).await;
    assert_eq!(built.summary.games_indexed, 10);

    let explorer = explorer_for(&built.serving);
    let result = explorer.query(STARTING_FEN, &QueryOptions::default()).await.unwrap();

    assert_eq!((result.white, result.draws, result.black), (5, 3, 2));
    assert_eq!(result.stats.total_games, 10);
    assert_eq!(result.stats.white_win_percent, 50.0);
    assert_eq!(result.stats.draw_percent, 30.0);
    assert_eq!(result.stats.black_win_percent, 20.0);

    assert_eq!(result.moves.len(), 2);
    let e4 = &result.moves[0];
    assert_eq!(e4.uci, "e2e4");
    assert_eq!(e4.san, "e4");
    assert_eq!(e4.total_games, 8);
    assert_eq!(e4.play_rate, 80.0);
    assert_eq!(e4.white_win_percent, 62.5);
    assert_eq!(e4.draw_percent, 37.5);
    assert_eq!(e4.black_win_percent, 0.0);
    // (5 * 2000 + 3 * 1700) / 8
    assert_eq!(e4.average_rating, Some(1888));

    let d4 = &result.moves[1];
    assert_eq!(d4.uci, "d2d4");
    assert_eq!(d4.total_games, 2);
    assert_eq!(d4.play_rate, 20.0);
    assert_eq!(d4.average_rating, None);

    assert!(result.opening.is_none());
    assert_eq!(result.database, "custom");

    let after_e4 = explorer
        .query(&fen_after(&["e4"]), &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(after_e4.opening.unwrap().name, "King's Pawn Game");
    assert_eq!(after_e4.stats.total_games, 8);
}

#[tokio::test]
async fn transpositions_share_statistics() {
    let mut pgn = game("1. d4 d5 2. c4 e6", "1-0", None);
    pgn.push_str(&game("1. c4 d5 2. d4 e6", "0-1", None));
    let built = build(&pgn).await;

    let explorer = explorer_for(&built.serving);
    let a = explorer
        .query(&fen_after(&["d4", "d5", "c4"]), &QueryOptions::default())
        .await
        .unwrap();
    let b = explorer
        .query(&fen_after(&["c4", "d5", "d4"]), &QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(a, b);
    assert_eq!(a.stats.total_games, 2);
    assert_eq!(a.moves.len(), 1);
    assert_eq!(a.moves[0].uci, "e7e6");
    assert_eq!(a.opening.as_ref().unwrap().eco, "D06");
}

#[tokio::test]
async fn position_totals_equal_move_totals() {
    let built = build(&ten_games()).await;
    let explorer = explorer_for(&built.serving);

    for moves in [&[][..], &["e4"][..], &["e4", "e5"][..], &["d4"][..]] {
        let result = explorer
            .query(&fen_after(moves), &QueryOptions::default())
            .await
            .unwrap();
        let from_moves: u64 = result.moves.iter().map(|m| m.total_games).sum();
        assert_eq!(result.stats.total_games, from_moves, "after {moves:?}");
        assert_eq!(result.white + result.draws + result.black, result.stats.total_games);
    }
}

#[tokio::test]
async fn percentages_close_to_one_hundred() {
    let mut pgn = String::new();
    for (moves, result) in [
        ("1. e4", "1-0"),
        ("1. d4", "0-1"),
        ("1. c4", "1/2-1/2"),
        ("1. Nf3", "1-0"),
        ("1. g3", "1-0"),
        ("1. b3", "0-1"),
        ("1. e4", "1/2-1/2"),
    ] {
        pgn.push_str(&game(moves, result, None));
    }
    let built = build(&pgn).await;
    let explorer = explorer_for(&built.serving);
    let result = explorer
        .query(STARTING_FEN, &QueryOptions::default())
        .await
        .unwrap();

    let stats = result.stats;
    let outcome_sum = stats.white_win_percent + stats.draw_percent + stats.black_win_percent;
    assert!((outcome_sum - 100.0).abs() <= 0.15, "{outcome_sum}");

    let play_sum: f64 = result.moves.iter().map(|m| m.play_rate).sum();
    let tolerance = 0.05 * result.moves.len() as f64 + 1e-9;
    assert!((play_sum - 100.0).abs() <= tolerance, "{play_sum}");
}

#[tokio::test]
async fn ties_break_by_uci_and_limit_truncates() {
    let mut pgn = String::new();
    for moves in ["1. g3", "1. b3", "1. e4", "1. e4", "1. a3"] {
        pgn.push_str(&game(moves, "1-0", None));
    }
    let built = build(&pgn).await;
    let explorer = explorer_for(&built.serving);

    let result = explorer
        .query(STARTING_FEN, &QueryOptions { limit: Some(3) })
        .await
        .unwrap();
    let ucis: Vec<&str> = result.moves.iter().map(|m| m.uci.as_str()).collect();
    assert_eq!(ucis, vec!["e2e4", "a2a3", "b2b3"]);
}

#[tokio::test]
async fn default_query_returns_every_move() {
    let first_moves = [
        "a3", "a4", "b3", "b4", "c3", "c4", "d3", "d4", "e3", "e4", "f3", "f4", "g3", "g4", "h3",
        "h4", "Na3", "Nc3", "Nf3", "Nh3",
    ];
    let mut pgn = String::new();
    for mv in first_moves {
        pgn.push_str(&game(&format!("1. {mv}"), "1-0", None));
    }
    let built = build(&pgn).await;
    let explorer = explorer_for(&built.serving);

    let result = explorer.query(STARTING_FEN, &QueryOptions::default()).await.unwrap();
    assert_eq!(result.moves.len(), 20);
    assert!(result.moves.iter().all(|m| m.play_rate == 5.0));
    let play_sum: f64 = result.moves.iter().map(|m| m.play_rate).sum();
    assert!((play_sum - 100.0).abs() < 1e-9, "{play_sum}");

    let limited = explorer
        .query(STARTING_FEN, &QueryOptions { limit: Some(12) })
        .await
        .unwrap();
    assert_eq!(limited.moves.len(), 12);
}

#[tokio::test]
async fn compaction_is_faithful() {
    let built = build(&ten_games()).await;

    let report = verify_compaction(
        &built.ingest,
        &built.serving,
        &VerifyOptions {
            full: true,
            ..VerifyOptions::default()
        },
    )
    .await
    .unwrap();
    assert!(report.is_valid(), "{:?}", report.discrepancies);
    assert_eq!(report.source_entries, report.target_entries);
    assert_eq!(report.checked_entries, report.source_entries);

    let ingest = IngestStore::open_read_only(&built.ingest).await.unwrap();
    let serving = ServingStore::open(&built.serving).unwrap();
    assert_eq!(ingest.stats().await.unwrap(), serving.stats());

    for moves in [&[][..], &["e4"][..], &["d4", "d5"][..]] {
        let hash = PositionHash::of_fen(&fen_after(moves)).unwrap();
        assert_eq!(
            ingest.get_position(hash).await.unwrap(),
            serving.get_position(hash).unwrap()
        );
        assert_eq!(ingest.get_moves(hash).await.unwrap(), serving.get_moves(hash).unwrap());
    }
}

#[tokio::test]
async fn unseen_position_yields_zero_result() {
    let built = build(&ten_games()).await;
    let explorer = explorer_for(&built.serving);

    let result = explorer
        .query(&fen_after(&["h4", "h5"]), &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!((result.white, result.draws, result.black), (0, 0, 0));
    assert_eq!(result.stats.total_games, 0);
    assert_eq!(result.stats.white_win_percent, 0.0);
    assert!(result.moves.is_empty());
    assert!(result.top_games.is_empty());
}

#[tokio::test]
async fn illegal_move_truncates_replay() {
    let pgn = game("1. e4 e5 2. Nf3 Nc6 3. Bb5 Ke3 4. a3", "1-0", None);
    let built = build(&pgn).await;

    assert_eq!(built.summary.games_indexed, 1);
    assert_eq!(built.summary.games_truncated, 1);
    assert_eq!(built.summary.positions_indexed, 5);

    let serving = ServingStore::open(&built.serving).unwrap();
    assert_eq!(serving.stats().positions, 5);
    assert_eq!(serving.stats().moves, 5);
}

#[tokio::test]
async fn explorer_close_and_reopen() {
    let built = build(&ten_games()).await;
    let explorer = explorer_for(&built.serving);

    let first = explorer.query(STARTING_FEN, &QueryOptions::default()).await.unwrap();
    assert!(explorer.is_open().await);
    explorer.close().await;
    assert!(!explorer.is_open().await);

    let second = explorer.query(STARTING_FEN, &QueryOptions::default()).await.unwrap();
    assert_eq!(first, second);
}
