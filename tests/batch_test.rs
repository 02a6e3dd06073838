//! Batch coordinator tests: conservation, failure isolation, idempotent
//! storage and career aggregation.
//!
//! Run with: cargo test --test batch_test

mod common;

use std::time::Duration;

use analysis_worker::analysis::GamePhase;
use analysis_worker::batch::{BatchCoordinator, GameInput, TrendDirection};
use analysis_worker::blunders::BlunderTheme;
use analysis_worker::error::WorkerError;
use analysis_worker::store::MemoryStore;
use chrono::NaiveDate;
use common::{constant_engine, fullmove, game_input, pgn, search_reply, settings, FakeEngine, Reply};

const SHORT_GAME: &str = "1. e4 e5 2. Nf3 Nc6";

// ----------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------

fn short_game(id: &str, white: &str, black: &str, result: &str, date: &str) -> GameInput {
    game_input(id, &pgn(white, black, result, date, None, SHORT_GAME), 1_700_000_000)
}

fn game_ids(store: &MemoryStore) -> Vec<String> {
    store.keys().into_iter().map(|k| k.game_id).collect()
}

// ----------------------------------------------------------------
// Tests
// ----------------------------------------------------------------

#[tokio::test]
async fn test_every_game_lands_in_one_outcome() {
    let games = vec![
        short_game("g1", "alice", "bob", "1-0", "2024.01.01"),
        short_game("g2", "carol", "alice", "1-0", "2024.01.02"),
        short_game("g3", "alice", "dave", "1/2-1/2", "2024.01.03"),
        short_game("g4", "alice", "erin", "*", "2024.01.04"),
        short_game("g5", "frank", "gina", "1-0", "2024.01.05"),
        short_game("g6", "alice", "bob", "0-1", "????.??.??"),
    ];

    let coordinator = BatchCoordinator::new(constant_engine(15), MemoryStore::new(), settings("alice"));
    let outcome = coordinator.run(games).await.expect("batch completes");
    let summary = &outcome.summary;

    let tally = &summary.outcomes;
    assert_eq!((tally.wins, tally.draws, tally.losses, tally.unknown), (1, 1, 2, 2));
    assert_eq!(tally.total, 6);
    assert_eq!(summary.total_games, 6);

    // Rates are over the four games with a known outcome
    assert_eq!(summary.win_rate, Some(25.0));
    assert_eq!(summary.draw_rate, Some(25.0));
    assert_eq!(summary.loss_rate, Some(50.0));

    let coverage = &summary.coverage;
    assert_eq!(coverage.analyzed, 5);
    assert_eq!(coverage.skipped, 1);
    assert_eq!(coverage.player_unidentified, 1);
    assert_eq!(coverage.unfinished, 1);
    assert_eq!(coverage.missing_date, 1);
    assert_eq!(coverage.missing_opening, 5);

    let report = &outcome.report;
    assert_eq!((report.succeeded, report.skipped, report.failed, report.pending), (5, 1, 0, 0));
    assert_eq!(report.completion_percent, 100.0);
    assert_eq!(report.skipped_games[0].game_id, "g5");

    assert_eq!(outcome.engine_summary.engine_name, "Stockfish");
    assert_eq!(outcome.engine_summary.engine_version, "16.1");
    assert_eq!(outcome.engine_summary.games_analyzed, 5);
    assert_eq!(outcome.engine_summary.mean_cpl, Some(30.0));

    let store = coordinator.store();
    assert_eq!(store.analysis_count(), 5);
    assert_eq!(store.career_summary().as_ref(), Some(summary));
    assert_eq!(store.engine_summary(), Some(outcome.engine_summary.clone()));
}

#[tokio::test]
async fn test_unparseable_game_is_skipped_but_tallied() {
    let games = vec![
        short_game("g1", "alice", "bob", "1-0", "2024.01.01"),
        game_input("g2", &pgn("alice", "bob", "0-1", "2024.01.02", None, ""), 1_700_000_000),
    ];

    let fake = constant_engine(15);
    let coordinator = BatchCoordinator::new(fake.clone(), MemoryStore::new(), settings("alice"));
    let outcome = coordinator.run(games).await.expect("batch completes");

    assert_eq!(outcome.report.total, 2);
    assert_eq!((outcome.report.succeeded, outcome.report.skipped), (1, 1));
    assert_eq!(outcome.report.skipped_games[0].game_id, "g2");
    assert!(outcome.report.skipped_games[0].error.contains("no moves"));

    let tally = &outcome.summary.outcomes;
    assert_eq!((tally.wins, tally.losses, tally.total), (1, 1, 2));
    assert_eq!(outcome.summary.total_games, 2);
    assert_eq!(fake.launches(), 1);
}

#[tokio::test]
async fn test_engine_exit_fails_only_that_game() {
    // Only the six-ply game reaches move three
    let fake = FakeEngine::new(|fen, _| {
        if fullmove(fen) == 3 {
            Reply::Exit
        } else {
            search_reply("cp 10", &["d2d4"])
        }
    });
    let games = vec![
        short_game("g1", "alice", "bob", "1-0", "2024.02.01"),
        game_input(
            "g2",
            &pgn("alice", "bob", "0-1", "2024.02.02", None, "1. e4 e5 2. Nf3 Nc6 3. Bc4 Bc5"),
            1_700_000_000,
        ),
        short_game("g3", "alice", "bob", "1/2-1/2", "2024.02.03"),
    ];

    let coordinator = BatchCoordinator::new(fake.clone(), MemoryStore::new(), settings("alice"));
    let outcome = coordinator.run(games).await.expect("batch completes");

    assert_eq!(outcome.report.succeeded, 2);
    assert_eq!(outcome.report.failed, 1);
    assert_eq!(outcome.report.failed_games[0].game_id, "g2");
    assert!(outcome.report.failed_games[0].error.contains("exited"));
    assert_eq!(outcome.summary.coverage.failed, 1);
    assert_eq!(outcome.engine_summary.games_failed, 1);

    // Failed games still count toward outcomes, but nothing partial is stored
    assert_eq!(outcome.summary.outcomes.total, 3);
    assert_eq!(outcome.summary.outcomes.losses, 1);
    assert_eq!(game_ids(coordinator.store()), vec!["g1", "g3"]);

    // Each game gets a fresh engine
    assert_eq!(fake.launches(), 3);
}

#[tokio::test]
async fn test_rerun_overwrites_instead_of_duplicating() {
    // Every tracked move loses 300cp
    let games = vec![
        short_game("g1", "alice", "bob", "0-1", "2024.03.01"),
        short_game("g2", "alice", "bob", "0-1", "2024.03.02"),
        short_game("g3", "alice", "bob", "0-1", "2024.03.03"),
    ];
    let coordinator = BatchCoordinator::new(constant_engine(150), MemoryStore::new(), settings("alice"));

    let first = coordinator.run(games.clone()).await.expect("first run");
    let second = coordinator.run(games).await.expect("second run");

    let store = coordinator.store();
    assert_eq!(store.analysis_count(), 3);
    assert_eq!(store.blunder_row_count(), 6);
    assert_eq!(store.writes(), 6);
    assert_eq!(first.summary, second.summary);

    let patterns = &second.summary.blunder_patterns;
    assert_eq!(patterns.len(), 1);
    assert_eq!(patterns[0].theme, BlunderTheme::HangingPiece);
    assert_eq!(patterns[0].phase, GamePhase::Opening);
    assert_eq!(patterns[0].count, 6);
    assert_eq!(patterns[0].mean_centipawn_loss, 300);
    assert_eq!(patterns[0].example_game_ids, vec!["g1", "g2", "g3"]);
}

#[tokio::test]
async fn test_unavailable_engine_aborts_run() {
    let games = vec![short_game("g1", "alice", "bob", "1-0", "2024.01.01")];
    let coordinator = BatchCoordinator::new(
        constant_engine(0).without_handshake(),
        MemoryStore::new(),
        settings("alice"),
    );

    let err = coordinator.run(games).await.unwrap_err();
    assert!(matches!(err, WorkerError::EngineUnavailable(_)));
    assert_eq!(coordinator.store().analysis_count(), 0);
    assert!(coordinator.store().career_summary().is_none());
}

#[tokio::test]
async fn test_move_and_game_timeouts_fail_games() {
    let silent = FakeEngine::new(|_, _| Reply::Silent);
    let games = vec![
        short_game("g1", "alice", "bob", "1-0", "2024.01.01"),
        short_game("g2", "alice", "bob", "1-0", "2024.01.02"),
    ];

    let mut move_limited = settings("alice");
    move_limited.move_timeout = Duration::from_millis(100);
    let outcome = BatchCoordinator::new(silent.clone(), MemoryStore::new(), move_limited)
        .run(games.clone())
        .await
        .expect("batch completes");
    assert_eq!(outcome.report.failed, 2);
    assert!(outcome.report.failed_games[0].error.contains("100ms"));

    let mut game_limited = settings("alice");
    game_limited.move_timeout = Duration::from_secs(10);
    game_limited.game_timeout = Some(Duration::from_millis(150));
    let outcome = BatchCoordinator::new(silent, MemoryStore::new(), game_limited)
        .run(games)
        .await
        .expect("batch completes");
    assert_eq!(outcome.report.failed, 2);
    assert!(outcome.report.failed_games[1].error.contains("150ms"));
    assert_eq!(outcome.summary.outcomes.wins, 2);
}

#[tokio::test]
async fn test_trends_and_openings_follow_game_dates() {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date");
    let mut games: Vec<GameInput> = (0..40)
        .map(|i| {
            let date = (start + chrono::Days::new(i)).format("%Y.%m.%d").to_string();
            let result = if i < 20 { "0-1" } else { "1-0" };
            let opening = if i < 2 { "Rare Gambit" } else { "Italian Game" };
            game_input(
                &format!("g{i:02}"),
                &pgn("alice", "bob", result, &date, Some(opening), SHORT_GAME),
                1_700_000_000,
            )
        })
        .collect();
    // Newest first on input; the coordinator must restore date order
    games.reverse();

    let mut parallel = settings("alice");
    parallel.chunk_size = 7;
    parallel.max_engines = 3;
    let fake = constant_engine(15);
    let outcome = BatchCoordinator::new(fake.clone(), MemoryStore::new(), parallel)
        .run(games)
        .await
        .expect("batch completes");
    let summary = &outcome.summary;

    assert_eq!(summary.games_analyzed, 40);
    assert_eq!(fake.launches(), 40);

    let trends = &summary.trends;
    assert_eq!(trends.games_considered, 40);
    assert_eq!(trends.window, 20);
    assert_eq!(trends.win_rate.direction, TrendDirection::Improving);
    assert_eq!(trends.win_rate.previous, Some(0.0));
    assert_eq!(trends.win_rate.recent, Some(100.0));
    assert_eq!(trends.accuracy.direction, TrendDirection::Stable);
    assert_eq!(trends.blunders_per_game.direction, TrendDirection::Stable);

    // Two-game openings are below the reporting floor
    assert_eq!(summary.openings.len(), 1);
    let italian = &summary.openings[0];
    assert_eq!(italian.opening, "Italian Game");
    assert_eq!((italian.games, italian.wins, italian.losses, italian.draws), (38, 20, 18, 0));
    assert_eq!(italian.average_accuracy, Some(85.0));
}

#[tokio::test]
async fn test_short_history_has_no_trend() {
    let games: Vec<GameInput> = (1..=5)
        .map(|d| short_game(&format!("g{d}"), "alice", "bob", "1-0", &format!("2024.04.0{d}")))
        .collect();
    let outcome = BatchCoordinator::new(constant_engine(0), MemoryStore::new(), settings("alice"))
        .run(games)
        .await
        .expect("batch completes");

    assert_eq!(outcome.summary.trends.window, 0);
    assert_eq!(outcome.summary.trends.win_rate.direction, TrendDirection::InsufficientData);

    let json = serde_json::to_value(&outcome).expect("outcome serializes");
    assert_eq!(json["summary"]["trends"]["win_rate"]["direction"], "insufficient_data");
    assert_eq!(json["summary"]["outcomes"]["wins"], 5);
    assert_eq!(json["report"]["completion_percent"], 100.0);
}

#[tokio::test]
async fn test_empty_batch() {
    let coordinator = BatchCoordinator::new(constant_engine(0), MemoryStore::new(), settings("alice"));
    let outcome = coordinator.run(Vec::new()).await.expect("batch completes");

    assert_eq!(outcome.report.total, 0);
    assert_eq!(outcome.report.completion_percent, 100.0);
    assert_eq!(outcome.summary.total_games, 0);
    assert_eq!(outcome.summary.win_rate, None);
    assert_eq!(outcome.engine_summary.engine_name, "unknown");
    assert!(coordinator.store().career_summary().is_some());
}
