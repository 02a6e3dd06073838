//! Batch analysis and career aggregation
//!
//! Games are processed oldest first in fixed-size chunks. Each game gets its
//! own engine process; within a chunk up to `max_engines` games run at once,
//! and results are folded back in game order by the coordinating task alone.

use std::collections::BTreeMap;
use std::time::Duration;

use chess_core::pgn::{parse_headers, parse_pgn};
use chess_core::{GameData, Side};
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::analyzer::{identify_player, GameAnalysisResult, GameAnalyzer};
use crate::blunders::{BlunderPattern, PatternAggregator};
use crate::engine::EngineLauncher;
use crate::error::{ErrorScope, WorkerError};
use crate::evaluation::EvaluationClient;
use crate::store::{AnalysisKey, AnalysisStore};

/// Fewer analyzed games than this and no trend is reported
pub const MIN_TREND_GAMES: usize = 20;
/// Upper bound on each trend window
pub const MAX_TREND_WINDOW: usize = 50;
/// Openings with fewer games are not reported
pub const MIN_OPENING_GAMES: u32 = 3;

/// Per-metric deltas that count as a real change
pub const ACCURACY_TREND_DELTA: f64 = 2.0;
pub const BLUNDER_TREND_DELTA: f64 = 0.2;
pub const WIN_RATE_TREND_DELTA: f64 = 5.0;

/// One game handed to the coordinator.
#[derive(Debug, Clone)]
pub struct GameInput {
    pub id: String,
    pub game: GameData,
    pub ingested_at: DateTime<Utc>,
    /// Set when the PGN could not be parsed. The game is skipped but its
    /// header result is still tallied.
    pub input_error: Option<String>,
}

impl GameInput {
    pub fn from_pgn(id: impl Into<String>, pgn: &str, ingested_at: DateTime<Utc>) -> Self {
        let (game, input_error) = match parse_pgn(pgn) {
            Ok(game) => (game, None),
            Err(e) => (
                GameData {
                    metadata: parse_headers(pgn),
                    moves: Vec::new(),
                    pgn: pgn.to_string(),
                },
                Some(e.to_string()),
            ),
        };
        Self {
            id: id.into(),
            game,
            ingested_at,
            input_error,
        }
    }

    /// Game date, falling back to the ingestion date.
    pub fn sort_date(&self) -> NaiveDate {
        self.game
            .metadata
            .parsed_date()
            .unwrap_or_else(|| self.ingested_at.date_naive())
    }
}

/// Oldest first; ties keep ingestion order.
pub fn order_chronologically(games: &mut [GameInput]) {
    games.sort_by(|a, b| {
        a.sort_date()
            .cmp(&b.sort_date())
            .then(a.ingested_at.cmp(&b.ingested_at))
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Draw,
    Loss,
    Unknown,
}

/// Outcome for the tracked player. Unknown covers an unidentified player,
/// unfinished games and unparseable results.
pub fn classify_outcome(result: &str, player: Option<Side>) -> Outcome {
    match (player, result.trim()) {
        (Some(Side::White), "1-0") | (Some(Side::Black), "0-1") => Outcome::Win,
        (Some(Side::White), "0-1") | (Some(Side::Black), "1-0") => Outcome::Loss,
        (Some(_), "1/2-1/2") => Outcome::Draw,
        _ => Outcome::Unknown,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeTally {
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
    pub unknown: u32,
    pub total: u32,
}

impl OutcomeTally {
    pub fn record(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Win => self.wins += 1,
            Outcome::Draw => self.draws += 1,
            Outcome::Loss => self.losses += 1,
            Outcome::Unknown => self.unknown += 1,
        }
    }

    pub fn known(&self) -> u32 {
        self.wins + self.draws + self.losses
    }

    /// Every input game must sit in exactly one bucket.
    pub fn verify(&self, expected_total: u32) -> Result<(), WorkerError> {
        if self.total == expected_total && self.known() + self.unknown == expected_total {
            Ok(())
        } else {
            Err(WorkerError::ResultConservationViolation {
                wins: self.wins,
                draws: self.draws,
                losses: self.losses,
                unknown: self.unknown,
                total: expected_total,
            })
        }
    }

    /// Percentage over known outcomes only.
    fn rate(&self, count: u32) -> Option<f64> {
        let known = self.known();
        (known > 0).then(|| count as f64 * 100.0 / known as f64)
    }
}

/// Counters for partially usable input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    pub analyzed: u32,
    pub skipped: u32,
    pub failed: u32,
    pub player_unidentified: u32,
    pub unfinished: u32,
    pub missing_date: u32,
    pub missing_opening: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Declining,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendMetric {
    pub recent: Option<f64>,
    pub previous: Option<f64>,
    pub delta: Option<f64>,
    pub direction: TrendDirection,
}

impl TrendMetric {
    fn insufficient() -> Self {
        Self {
            recent: None,
            previous: None,
            delta: None,
            direction: TrendDirection::InsufficientData,
        }
    }

    fn compare(recent: Option<f64>, previous: Option<f64>, threshold: f64, higher_is_better: bool) -> Self {
        let (Some(r), Some(p)) = (recent, previous) else {
            return Self {
                recent,
                previous,
                delta: None,
                direction: TrendDirection::InsufficientData,
            };
        };

        let delta = r - p;
        let gain = if higher_is_better { delta } else { -delta };
        let direction = if gain > threshold {
            TrendDirection::Improving
        } else if gain < -threshold {
            TrendDirection::Declining
        } else {
            TrendDirection::Stable
        };

        Self {
            recent,
            previous,
            delta: Some(delta),
            direction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trends {
    pub games_considered: usize,
    /// Games in each window; 0 when there is not enough history
    pub window: usize,
    pub accuracy: TrendMetric,
    pub blunders_per_game: TrendMetric,
    pub win_rate: TrendMetric,
}

/// What one analyzed game contributes to trends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendPoint {
    pub accuracy: Option<f64>,
    pub blunders: u32,
    pub outcome: Outcome,
}

fn window_accuracy(points: &[TrendPoint]) -> Option<f64> {
    let values: Vec<f64> = points.iter().filter_map(|p| p.accuracy).collect();
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn window_blunders(points: &[TrendPoint]) -> Option<f64> {
    (!points.is_empty())
        .then(|| points.iter().map(|p| p.blunders as f64).sum::<f64>() / points.len() as f64)
}

fn window_win_rate(points: &[TrendPoint]) -> Option<f64> {
    let mut tally = OutcomeTally::default();
    for point in points {
        tally.record(point.outcome);
    }
    tally.rate(tally.wins)
}

/// Compare the trailing window against the one right before it.
/// `points` must be oldest first.
pub fn compute_trends(points: &[TrendPoint]) -> Trends {
    let n = points.len();
    if n < MIN_TREND_GAMES {
        return Trends {
            games_considered: n,
            window: 0,
            accuracy: TrendMetric::insufficient(),
            blunders_per_game: TrendMetric::insufficient(),
            win_rate: TrendMetric::insufficient(),
        };
    }

    let window = MAX_TREND_WINDOW.min(n / 2);
    let recent = &points[n - window..];
    let previous = &points[n - 2 * window..n - window];

    Trends {
        games_considered: n,
        window,
        accuracy: TrendMetric::compare(
            window_accuracy(recent),
            window_accuracy(previous),
            ACCURACY_TREND_DELTA,
            true,
        ),
        blunders_per_game: TrendMetric::compare(
            window_blunders(recent),
            window_blunders(previous),
            BLUNDER_TREND_DELTA,
            false,
        ),
        win_rate: TrendMetric::compare(
            window_win_rate(recent),
            window_win_rate(previous),
            WIN_RATE_TREND_DELTA,
            true,
        ),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpeningStats {
    pub opening: String,
    pub games: u32,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
    pub average_accuracy: Option<f64>,
    pub average_cpl: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CareerSummary {
    pub player_names: Vec<String>,
    pub total_games: u32,
    pub outcomes: OutcomeTally,
    /// Percentages over games with a known outcome
    pub win_rate: Option<f64>,
    pub draw_rate: Option<f64>,
    pub loss_rate: Option<f64>,
    pub coverage: Coverage,
    pub games_analyzed: u32,
    pub average_accuracy: Option<f64>,
    pub average_cpl: Option<f64>,
    pub opening_cpl: Option<f64>,
    pub middlegame_cpl: Option<f64>,
    pub endgame_cpl: Option<f64>,
    pub total_blunders: u32,
    pub total_mistakes: u32,
    pub total_inaccuracies: u32,
    pub blunders_per_game: Option<f64>,
    pub blunder_patterns: Vec<BlunderPattern>,
    pub openings: Vec<OpeningStats>,
    pub trends: Trends,
}

/// Engine-level totals for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSummary {
    pub engine_name: String,
    pub engine_version: String,
    pub depth: u32,
    pub games_analyzed: u32,
    pub games_failed: u32,
    pub total_blunders: u32,
    pub mean_cpl: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameFailure {
    pub game_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub total: u32,
    pub succeeded: u32,
    pub skipped: u32,
    pub failed: u32,
    pub pending: u32,
    pub completion_percent: f64,
    pub skipped_games: Vec<GameFailure>,
    pub failed_games: Vec<GameFailure>,
}

impl BatchReport {
    fn new(total: usize) -> Self {
        let mut report = Self {
            total: total as u32,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            pending: total as u32,
            completion_percent: 0.0,
            skipped_games: Vec::new(),
            failed_games: Vec::new(),
        };
        report.refresh();
        report
    }

    fn refresh(&mut self) {
        let done = self.succeeded + self.skipped + self.failed;
        self.pending = self.total.saturating_sub(done);
        self.completion_percent = if self.total == 0 {
            100.0
        } else {
            done as f64 * 100.0 / self.total as f64
        };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub report: BatchReport,
    pub summary: CareerSummary,
    pub engine_summary: EngineSummary,
}

/// Condensed per-game numbers kept for career aggregation.
#[derive(Debug, Clone)]
struct GameDigest {
    opening: Option<String>,
    outcome: Outcome,
    accuracy: Option<f64>,
    average_cpl: Option<f64>,
    opening_cpl: Option<f64>,
    middlegame_cpl: Option<f64>,
    endgame_cpl: Option<f64>,
    blunders: u32,
    mistakes: u32,
    inaccuracies: u32,
}

fn mean_of(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let values: Vec<f64> = values.flatten().collect();
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Career fold, owned by the coordinating task only.
struct CareerAggregator {
    player_names: Vec<String>,
    outcomes: OutcomeTally,
    coverage: Coverage,
    digests: Vec<GameDigest>,
    patterns: PatternAggregator,
}

impl CareerAggregator {
    fn new(player_names: Vec<String>) -> Self {
        Self {
            player_names,
            outcomes: OutcomeTally::default(),
            coverage: Coverage::default(),
            digests: Vec::new(),
            patterns: PatternAggregator::new(),
        }
    }

    /// Counted for every input game, whatever happens to its analysis.
    fn record_input(&mut self, input: &GameInput) -> Outcome {
        let metadata = &input.game.metadata;
        let player = identify_player(metadata, &self.player_names);
        let outcome = classify_outcome(&metadata.result, player);
        self.outcomes.record(outcome);

        if player.is_none() {
            self.coverage.player_unidentified += 1;
        } else if outcome == Outcome::Unknown {
            self.coverage.unfinished += 1;
        }
        if metadata.parsed_date().is_none() {
            self.coverage.missing_date += 1;
        }
        outcome
    }

    fn record_result(&mut self, result: &GameAnalysisResult, outcome: Outcome) {
        self.coverage.analyzed += 1;
        if result.opening_name.is_none() {
            self.coverage.missing_opening += 1;
        }
        self.patterns.extend(&result.blunder_details);
        self.digests.push(GameDigest {
            opening: result.opening_name.clone(),
            outcome,
            accuracy: result.accuracy,
            average_cpl: result.average_centipawn_loss,
            opening_cpl: result.opening_cpl,
            middlegame_cpl: result.middlegame_cpl,
            endgame_cpl: result.endgame_cpl,
            blunders: result.blunders,
            mistakes: result.mistakes,
            inaccuracies: result.inaccuracies,
        });
    }

    fn openings(&self) -> Vec<OpeningStats> {
        let mut groups: BTreeMap<&str, Vec<&GameDigest>> = BTreeMap::new();
        for digest in &self.digests {
            if let Some(opening) = digest.opening.as_deref() {
                groups.entry(opening).or_default().push(digest);
            }
        }

        let mut stats: Vec<OpeningStats> = groups
            .into_iter()
            .filter(|(_, games)| games.len() as u32 >= MIN_OPENING_GAMES)
            .map(|(opening, games)| OpeningStats {
                opening: opening.to_string(),
                games: games.len() as u32,
                wins: games.iter().filter(|g| g.outcome == Outcome::Win).count() as u32,
                draws: games.iter().filter(|g| g.outcome == Outcome::Draw).count() as u32,
                losses: games.iter().filter(|g| g.outcome == Outcome::Loss).count() as u32,
                average_accuracy: mean_of(games.iter().map(|g| g.accuracy)),
                average_cpl: mean_of(games.iter().map(|g| g.average_cpl)),
            })
            .collect();
        stats.sort_by(|a, b| b.games.cmp(&a.games).then_with(|| a.opening.cmp(&b.opening)));
        stats
    }

    fn finish(self, input_games: u32) -> Result<CareerSummary, WorkerError> {
        self.outcomes.verify(input_games)?;

        let analyzed = self.digests.len() as u32;
        let total_blunders: u32 = self.digests.iter().map(|d| d.blunders).sum();
        let points: Vec<TrendPoint> = self
            .digests
            .iter()
            .map(|d| TrendPoint {
                accuracy: d.accuracy,
                blunders: d.blunders,
                outcome: d.outcome,
            })
            .collect();

        Ok(CareerSummary {
            total_games: input_games,
            win_rate: self.outcomes.rate(self.outcomes.wins),
            draw_rate: self.outcomes.rate(self.outcomes.draws),
            loss_rate: self.outcomes.rate(self.outcomes.losses),
            games_analyzed: analyzed,
            average_accuracy: mean_of(self.digests.iter().map(|d| d.accuracy)),
            average_cpl: mean_of(self.digests.iter().map(|d| d.average_cpl)),
            opening_cpl: mean_of(self.digests.iter().map(|d| d.opening_cpl)),
            middlegame_cpl: mean_of(self.digests.iter().map(|d| d.middlegame_cpl)),
            endgame_cpl: mean_of(self.digests.iter().map(|d| d.endgame_cpl)),
            total_blunders,
            total_mistakes: self.digests.iter().map(|d| d.mistakes).sum(),
            total_inaccuracies: self.digests.iter().map(|d| d.inaccuracies).sum(),
            blunders_per_game: (analyzed > 0).then(|| total_blunders as f64 / analyzed as f64),
            openings: self.openings(),
            trends: compute_trends(&points),
            blunder_patterns: self.patterns.finish(),
            player_names: self.player_names,
            outcomes: self.outcomes,
            coverage: self.coverage,
        })
    }
}

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub player_names: Vec<String>,
    pub depth: u32,
    pub chunk_size: usize,
    pub max_engines: usize,
    pub move_timeout: Duration,
    /// Wall-clock limit for one whole game
    pub game_timeout: Option<Duration>,
}

pub struct BatchCoordinator<L, S> {
    launcher: L,
    store: S,
    settings: BatchSettings,
}

impl<L: EngineLauncher, S: AnalysisStore> BatchCoordinator<L, S> {
    pub fn new(launcher: L, store: S, settings: BatchSettings) -> Self {
        Self {
            launcher,
            store,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// Analyze, persist and aggregate every game.
    ///
    /// Input and per-game engine failures are counted and the batch goes on.
    /// Run-level failures (engine missing, storage) and a broken outcome
    /// tally abort the run.
    pub async fn run(&self, mut games: Vec<GameInput>) -> Result<BatchOutcome, WorkerError> {
        order_chronologically(&mut games);

        let analyzer = GameAnalyzer::new(self.settings.player_names.clone(), self.settings.depth);
        let mut career = CareerAggregator::new(self.settings.player_names.clone());
        let mut report = BatchReport::new(games.len());
        let mut engine_identity: Option<(String, String)> = None;
        let mut cpl_values: Vec<f64> = Vec::new();

        let chunk_size = self.settings.chunk_size.max(1);
        let parallelism = self.settings.max_engines.max(1);

        info!(
            games = games.len(),
            chunk_size,
            parallelism,
            depth = self.settings.depth,
            "Starting batch"
        );

        for (chunk_index, chunk) in games.chunks(chunk_size).enumerate() {
            // buffered() yields in input order, so the fold stays chronological
            let results: Vec<Result<GameAnalysisResult, WorkerError>> = stream::iter(chunk)
                .map(|input| self.analyze_one(&analyzer, input))
                .buffered(parallelism)
                .collect()
                .await;

            for (input, result) in chunk.iter().zip(results) {
                let outcome = career.record_input(input);

                match result {
                    Ok(analysis) => {
                        let key = AnalysisKey::for_result(&analysis);
                        self.store.save_game_analysis(&key, &analysis).await?;
                        self.store
                            .replace_blunders(&key, &analysis.blunder_details)
                            .await?;

                        if engine_identity.is_none() {
                            engine_identity =
                                Some((analysis.engine_name.clone(), analysis.engine_version.clone()));
                        }
                        if let Some(cpl) = analysis.average_centipawn_loss {
                            cpl_values.push(cpl);
                        }
                        career.record_result(&analysis, outcome);
                        report.succeeded += 1;
                    }
                    Err(e) => match e.scope() {
                        ErrorScope::Input => {
                            warn!(game_id = %input.id, error = %e, "Skipping game");
                            career.coverage.skipped += 1;
                            report.skipped += 1;
                            report.skipped_games.push(GameFailure {
                                game_id: input.id.clone(),
                                error: e.to_string(),
                            });
                        }
                        ErrorScope::Game => {
                            error!(game_id = %input.id, error = %e, "Game analysis failed");
                            career.coverage.failed += 1;
                            report.failed += 1;
                            report.failed_games.push(GameFailure {
                                game_id: input.id.clone(),
                                error: e.to_string(),
                            });
                        }
                        ErrorScope::Run | ErrorScope::Batch => {
                            error!(game_id = %input.id, error = %e, "Aborting batch");
                            return Err(e);
                        }
                    },
                }
            }

            report.refresh();
            info!(
                chunk = chunk_index + 1,
                succeeded = report.succeeded,
                skipped = report.skipped,
                failed = report.failed,
                pending = report.pending,
                completion_percent = report.completion_percent,
                "Chunk complete"
            );
        }

        let summary = career.finish(games.len() as u32)?;
        self.store.save_career_summary(&summary).await?;

        let (engine_name, engine_version) =
            engine_identity.unwrap_or_else(|| ("unknown".to_string(), "unknown".to_string()));
        let engine_summary = EngineSummary {
            engine_name,
            engine_version,
            depth: self.settings.depth,
            games_analyzed: report.succeeded,
            games_failed: report.failed,
            total_blunders: summary.total_blunders,
            mean_cpl: mean_of(cpl_values.into_iter().map(Some)),
        };
        self.store.save_engine_summary(&engine_summary).await?;

        info!(
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failed,
            "Batch complete"
        );

        Ok(BatchOutcome {
            report,
            summary,
            engine_summary,
        })
    }

    /// One game on a fresh engine. The engine is always stopped, and a failed
    /// game yields no partial result.
    async fn analyze_one(
        &self,
        analyzer: &GameAnalyzer,
        input: &GameInput,
    ) -> Result<GameAnalysisResult, WorkerError> {
        if let Some(reason) = &input.input_error {
            return Err(WorkerError::InvalidGame(format!("{}: {reason}", input.id)));
        }
        let prepared = analyzer.prepare(&input.id, &input.game)?;

        let engine = self.launcher.launch().await?;
        let mut client = EvaluationClient::new(engine, self.settings.move_timeout);

        let result = match self.settings.game_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, analyzer.analyze(&mut client, &prepared)).await {
                    Ok(result) => result,
                    Err(_) => Err(WorkerError::EngineTimeout(limit.as_millis() as u64)),
                }
            }
            None => analyzer.analyze(&mut client, &prepared).await,
        };

        client.shutdown().await;
        result
    }
}
