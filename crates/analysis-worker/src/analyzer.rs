//! Core game analysis logic
//!
//! Replays one game on a shakmaty board, queries the engine before and after
//! every move by the tracked player, and folds the losses into phase buckets,
//! move categories and annotated event lists.

use chess_core::opening::derive_opening_name;
use chess_core::{GameData, GameMetadata, MoveRecord, Side};
use serde::{Deserialize, Serialize};
use shakmaty::fen::Fen;
use shakmaty::san::San;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Position as _};
use tracing::{debug, info};

use crate::analysis::{
    self, calculate_accuracy, centipawn_loss, classify_loss, is_missed_tactic, is_time_trouble,
    phase_for_move, GamePhase, MoveCategory, CRITICAL_SWING, PV_SNAPSHOT_INTERVAL,
};
use crate::blunders::{classify_blunder, BlunderDetail, BlunderFacts};
use crate::error::WorkerError;
use crate::evaluation::{EvaluationClient, Position};

/// One scored move by the tracked player. Evaluations are in the player's
/// perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisEvent {
    pub ply: u32,
    pub move_number: u32,
    pub phase: GamePhase,
    pub move_san: String,
    pub move_uci: String,
    pub best_move: Option<String>,
    pub eval_before: i32,
    pub best_eval: i32,
    pub eval_after: i32,
    pub centipawn_loss: i32,
    pub category: Option<MoveCategory>,
}

/// Large swing between two consecutive tracked evaluations (White-positive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalMoment {
    pub ply: u32,
    pub move_number: u32,
    pub move_san: String,
    pub previous_eval: i32,
    pub eval_after: i32,
    pub swing: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissedTactic {
    pub ply: u32,
    pub move_number: u32,
    pub played: String,
    pub best_move: String,
    pub best_eval: i32,
    pub actual_eval: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeTroubleFlag {
    pub ply: u32,
    pub move_number: u32,
    pub centipawn_loss: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvSnapshot {
    pub ply: u32,
    pub move_number: u32,
    pub fen: String,
    pub principal_variation: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameAnalysisResult {
    pub game_id: String,
    pub player_color: Side,
    pub opening_name: Option<String>,
    pub result: String,
    pub date: Option<String>,
    pub engine_name: String,
    pub engine_version: String,
    pub depth: u32,
    /// Plies in the game, both sides
    pub game_length: u32,
    pub tracked_moves: u32,
    /// None when the bucket has no moves
    pub average_centipawn_loss: Option<f64>,
    pub opening_cpl: Option<f64>,
    pub middlegame_cpl: Option<f64>,
    pub endgame_cpl: Option<f64>,
    pub accuracy: Option<f64>,
    pub blunders: u32,
    pub mistakes: u32,
    pub inaccuracies: u32,
    pub eval_swing_max: i32,
    pub events: Vec<AnalysisEvent>,
    pub critical_moments: Vec<CriticalMoment>,
    pub missed_tactics: Vec<MissedTactic>,
    pub time_trouble: Vec<TimeTroubleFlag>,
    pub pv_snapshots: Vec<PvSnapshot>,
    pub blunder_details: Vec<BlunderDetail>,
}

/// One replayed ply, ready for engine queries.
#[derive(Debug, Clone)]
pub struct PreparedPly {
    pub record: MoveRecord,
    pub before: Position,
    pub after: Position,
    pub uci: String,
    pub was_capture: bool,
}

/// A game whose moves all replayed legally and whose tracked player is known.
#[derive(Debug, Clone)]
pub struct PreparedGame {
    pub game_id: String,
    pub player_color: Side,
    pub metadata: GameMetadata,
    pub opening_name: Option<String>,
    pub plies: Vec<PreparedPly>,
}

/// Which side a tracked name plays. Case-insensitive substring match; White
/// is checked first.
pub fn identify_player(metadata: &GameMetadata, player_names: &[String]) -> Option<Side> {
    let white = metadata.white.to_lowercase();
    let black = metadata.black.to_lowercase();
    let names: Vec<String> = player_names
        .iter()
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect();

    if names.iter().any(|n| white.contains(n.as_str())) {
        Some(Side::White)
    } else if names.iter().any(|n| black.contains(n.as_str())) {
        Some(Side::Black)
    } else {
        None
    }
}

fn side_of(color: Color) -> Side {
    match color {
        Color::White => Side::White,
        Color::Black => Side::Black,
    }
}

fn position_of(pos: &Chess) -> Position {
    let fen = Fen::from_position(pos, EnPassantMode::Legal).to_string();
    Position::new(fen, side_of(pos.turn()))
}

/// Replay `moves` from the initial position.
pub fn replay_moves(game_id: &str, records: &[MoveRecord]) -> Result<Vec<PreparedPly>, WorkerError> {
    let mut pos = Chess::default();
    let mut plies = Vec::with_capacity(records.len());

    for record in records {
        let san: San = record.san.parse().map_err(|e| {
            WorkerError::InvalidGame(format!(
                "{game_id}: unparseable move '{}' at ply {}: {e}",
                record.san, record.ply
            ))
        })?;
        let mv = san.to_move(&pos).map_err(|e| {
            WorkerError::InvalidGame(format!(
                "{game_id}: illegal move '{}' at ply {}: {e}",
                record.san, record.ply
            ))
        })?;

        let before = position_of(&pos);
        let uci = mv.to_uci(CastlingMode::Standard).to_string();
        let was_capture = mv.is_capture();
        pos.play_unchecked(mv);

        plies.push(PreparedPly {
            record: record.clone(),
            before,
            after: position_of(&pos),
            uci,
            was_capture,
        });
    }

    Ok(plies)
}

#[derive(Debug, Clone)]
pub struct GameAnalyzer {
    player_names: Vec<String>,
    depth: u32,
}

#[derive(Default)]
struct PhaseLosses {
    all: Vec<i32>,
    opening: Vec<i32>,
    middlegame: Vec<i32>,
    endgame: Vec<i32>,
}

impl PhaseLosses {
    fn push(&mut self, phase: GamePhase, loss: i32) {
        self.all.push(loss);
        match phase {
            GamePhase::Opening => self.opening.push(loss),
            GamePhase::Middlegame => self.middlegame.push(loss),
            GamePhase::Endgame => self.endgame.push(loss),
        }
    }
}

impl GameAnalyzer {
    pub fn new(player_names: Vec<String>, depth: u32) -> Self {
        Self { player_names, depth }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Identify the player and replay every move. No engine calls happen here,
    /// so bad input is rejected before any protocol round trip.
    pub fn prepare(&self, game_id: &str, game: &GameData) -> Result<PreparedGame, WorkerError> {
        let player_color = identify_player(&game.metadata, &self.player_names)
            .ok_or_else(|| WorkerError::PlayerNotIdentified(game_id.to_string()))?;

        let plies = replay_moves(game_id, &game.move_records())?;
        if plies.is_empty() {
            return Err(WorkerError::InvalidGame(format!("{game_id}: no moves")));
        }

        Ok(PreparedGame {
            game_id: game_id.to_string(),
            player_color,
            metadata: game.metadata.clone(),
            opening_name: derive_opening_name(&game.metadata),
            plies,
        })
    }

    /// Score every tracked move of a prepared game, strictly in ply order.
    pub async fn analyze(
        &self,
        client: &mut EvaluationClient,
        game: &PreparedGame,
    ) -> Result<GameAnalysisResult, WorkerError> {
        let player = game.player_color;
        let depth = self.depth;

        let mut losses = PhaseLosses::default();
        let mut events = Vec::new();
        let mut critical_moments = Vec::new();
        let mut missed_tactics = Vec::new();
        let mut time_trouble = Vec::new();
        let mut pv_snapshots = Vec::new();
        let mut blunder_details = Vec::new();
        let (mut blunders, mut mistakes, mut inaccuracies) = (0u32, 0u32, 0u32);
        let mut eval_swing_max = 0i32;
        let mut previous_after: Option<i32> = None;
        let mut tracked = 0u32;

        for ply in game.plies.iter().filter(|p| p.record.side_to_move == player) {
            tracked += 1;
            let move_number = ply.record.move_number;

            // Best line must come from the position before the move is played
            let best = client.best_move_and_line(&ply.before, depth).await?;
            let eval_before = client.evaluate_at_depth(&ply.before, depth).await?;
            let eval_after = client.evaluate_at_depth(&ply.after, depth).await?;

            let best_pov = best.evaluation.for_player(player).centipawns();
            let before_pov = eval_before.for_player(player).centipawns();
            let after_pov = eval_after.for_player(player).centipawns();
            let loss = centipawn_loss(best_pov, after_pov);
            let category = classify_loss(loss);
            let phase = phase_for_move(move_number);

            debug!(
                game_id = %game.game_id,
                ply = ply.record.ply,
                san = %ply.record.san,
                best = best_pov,
                after = after_pov,
                loss,
                "Scored move"
            );

            losses.push(phase, loss);
            match category {
                Some(MoveCategory::Blunder) => blunders += 1,
                Some(MoveCategory::Mistake) => mistakes += 1,
                Some(MoveCategory::Inaccuracy) => inaccuracies += 1,
                None => {}
            }

            let after_white = eval_after.centipawns();
            if let Some(previous) = previous_after {
                let swing = (after_white - previous).abs();
                eval_swing_max = eval_swing_max.max(swing);
                if swing > CRITICAL_SWING {
                    critical_moments.push(CriticalMoment {
                        ply: ply.record.ply,
                        move_number,
                        move_san: ply.record.san.clone(),
                        previous_eval: previous,
                        eval_after: after_white,
                        swing,
                    });
                }
            }
            previous_after = Some(after_white);

            if is_missed_tactic(best.best_move.as_deref(), &ply.uci, best_pov, after_pov) {
                missed_tactics.push(MissedTactic {
                    ply: ply.record.ply,
                    move_number,
                    played: ply.record.san.clone(),
                    best_move: best.best_move.clone().unwrap_or_default(),
                    best_eval: best_pov,
                    actual_eval: after_pov,
                });
            }

            if is_time_trouble(category, move_number) {
                time_trouble.push(TimeTroubleFlag {
                    ply: ply.record.ply,
                    move_number,
                    centipawn_loss: loss,
                });
            }

            if tracked % PV_SNAPSHOT_INTERVAL == 0 {
                pv_snapshots.push(PvSnapshot {
                    ply: ply.record.ply,
                    move_number,
                    fen: ply.before.fen.clone(),
                    principal_variation: best.principal_variation.clone(),
                });
            }

            if category == Some(MoveCategory::Blunder) {
                let facts = BlunderFacts {
                    eval_before: before_pov,
                    eval_after: after_pov,
                    centipawn_loss: loss,
                    was_capture: ply.was_capture,
                };
                blunder_details.push(BlunderDetail {
                    game_id: game.game_id.clone(),
                    ply: ply.record.ply,
                    move_number,
                    phase,
                    player_color: player,
                    fen_before: ply.before.fen.clone(),
                    move_san: ply.record.san.clone(),
                    move_uci: ply.uci.clone(),
                    best_move: best.best_move.clone(),
                    eval_before: before_pov,
                    eval_after: after_pov,
                    centipawn_loss: loss,
                    was_capture: ply.was_capture,
                    theme: classify_blunder(&facts),
                });
            }

            events.push(AnalysisEvent {
                ply: ply.record.ply,
                move_number,
                phase,
                move_san: ply.record.san.clone(),
                move_uci: ply.uci.clone(),
                best_move: best.best_move,
                eval_before: before_pov,
                best_eval: best_pov,
                eval_after: after_pov,
                centipawn_loss: loss,
                category,
            });
        }

        let identity = client.identity().clone();
        let result = GameAnalysisResult {
            game_id: game.game_id.clone(),
            player_color: player,
            opening_name: game.opening_name.clone(),
            result: game.metadata.result.clone(),
            date: game.metadata.date.clone(),
            engine_name: identity.name,
            engine_version: identity.version,
            depth,
            game_length: game.plies.len() as u32,
            tracked_moves: tracked,
            average_centipawn_loss: analysis::average(&losses.all),
            opening_cpl: analysis::average(&losses.opening),
            middlegame_cpl: analysis::average(&losses.middlegame),
            endgame_cpl: analysis::average(&losses.endgame),
            accuracy: calculate_accuracy(&losses.all),
            blunders,
            mistakes,
            inaccuracies,
            eval_swing_max,
            events,
            critical_moments,
            missed_tactics,
            time_trouble,
            pv_snapshots,
            blunder_details,
        };

        info!(
            game_id = %result.game_id,
            tracked_moves = result.tracked_moves,
            blunders = result.blunders,
            mistakes = result.mistakes,
            inaccuracies = result.inaccuracies,
            "Game analysis complete"
        );

        Ok(result)
    }

    /// Prepare and analyze in one call.
    pub async fn analyze_game(
        &self,
        client: &mut EvaluationClient,
        game_id: &str,
        game: &GameData,
    ) -> Result<GameAnalysisResult, WorkerError> {
        let prepared = self.prepare(game_id, game)?;
        self.analyze(client, &prepared).await
    }
}
