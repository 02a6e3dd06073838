//! Typed evaluation requests on top of the raw engine conversation.

use std::collections::HashMap;
use std::time::Duration;

use chess_core::Side;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{EngineIdentity, EngineProcess};
use crate::error::WorkerError;
use crate::protocol::{is_best_move_line, RawScore, SearchOutcome};

/// Centipawn stand-in for any forced mate.
pub const MATE_SCORE: i32 = 100_000;

/// Principal variations are kept to this many plies.
pub const PV_PREFIX_LEN: usize = 5;

/// A score that is either centipawns or a forced mate, never both.
///
/// The reference frame depends on context: engine output is side-to-move
/// relative, stored evaluations are White-positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evaluation {
    Centipawns(i32),
    Mate { moves: u32, winning: bool },
}

impl Evaluation {
    pub fn from_raw(raw: RawScore) -> Self {
        match raw {
            RawScore::Cp(cp) => Evaluation::Centipawns(cp),
            // "mate 0": the side to move is already mated
            RawScore::Mate(n) => Evaluation::Mate {
                moves: n.unsigned_abs(),
                winning: n > 0,
            },
        }
    }

    /// Centipawn value with mates mapped to `±MATE_SCORE`.
    pub fn centipawns(self) -> i32 {
        match self {
            Evaluation::Centipawns(cp) => cp,
            Evaluation::Mate { winning: true, .. } => MATE_SCORE,
            Evaluation::Mate { winning: false, .. } => -MATE_SCORE,
        }
    }

    pub fn is_mate(self) -> bool {
        matches!(self, Evaluation::Mate { .. })
    }

    pub fn negate(self) -> Self {
        match self {
            Evaluation::Centipawns(cp) => Evaluation::Centipawns(-cp),
            Evaluation::Mate { moves, winning } => Evaluation::Mate {
                moves,
                winning: !winning,
            },
        }
    }

    /// Side-to-move relative -> White-positive.
    pub fn to_white(self, side_to_move: Side) -> Self {
        match side_to_move {
            Side::White => self,
            Side::Black => self.negate(),
        }
    }

    /// White-positive -> `player`'s perspective.
    pub fn for_player(self, player: Side) -> Self {
        match player {
            Side::White => self,
            Side::Black => self.negate(),
        }
    }
}

/// A board encoding plus the side to move.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    pub fen: String,
    pub side_to_move: Side,
}

impl Position {
    pub fn new(fen: impl Into<String>, side_to_move: Side) -> Self {
        Self {
            fen: fen.into(),
            side_to_move,
        }
    }

    /// Side to move is read from the FEN's second field.
    pub fn from_fen(fen: &str) -> Option<Self> {
        let side_to_move = match fen.split_whitespace().nth(1)? {
            "w" => Side::White,
            "b" => Side::Black,
            _ => return None,
        };
        Some(Self::new(fen.trim(), side_to_move))
    }
}

/// Engine's preferred continuation from a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestLine {
    /// UCI notation; None when the side to move has no legal moves
    pub best_move: Option<String>,
    /// White-positive
    pub evaluation: Evaluation,
    pub principal_variation: Vec<String>,
}

pub struct EvaluationClient {
    engine: EngineProcess,
    move_timeout: Duration,
    cache: HashMap<(String, u32), SearchOutcome>,
}

impl EvaluationClient {
    pub fn new(engine: EngineProcess, move_timeout: Duration) -> Self {
        Self {
            engine,
            move_timeout,
            cache: HashMap::new(),
        }
    }

    pub fn identity(&self) -> &EngineIdentity {
        self.engine.identity()
    }

    pub fn cached_positions(&self) -> usize {
        self.cache.len()
    }

    /// White-positive evaluation of `position` at `depth`.
    pub async fn evaluate_at_depth(
        &mut self,
        position: &Position,
        depth: u32,
    ) -> Result<Evaluation, WorkerError> {
        let outcome = self.search(position, depth).await?;
        white_evaluation(&outcome, position)
    }

    pub async fn best_move_and_line(
        &mut self,
        position: &Position,
        depth: u32,
    ) -> Result<BestLine, WorkerError> {
        let outcome = self.search(position, depth).await?;
        let evaluation = white_evaluation(&outcome, position)?;

        Ok(BestLine {
            best_move: outcome.best_move,
            evaluation,
            principal_variation: outcome
                .principal_variation
                .into_iter()
                .take(PV_PREFIX_LEN)
                .collect(),
        })
    }

    /// Memoized per (position, depth); a deeper request never reuses a
    /// shallower answer.
    async fn search(&mut self, position: &Position, depth: u32) -> Result<SearchOutcome, WorkerError> {
        let key = (position.fen.clone(), depth);
        if let Some(hit) = self.cache.get(&key) {
            debug!(fen = %position.fen, depth, "Evaluation cache hit");
            return Ok(hit.clone());
        }

        let position_cmd = format!("position fen {}", position.fen);
        let go_cmd = format!("go depth {depth}");
        let lines = self
            .engine
            .request(&[position_cmd.as_str(), go_cmd.as_str()], is_best_move_line, self.move_timeout)
            .await?;

        let outcome = SearchOutcome::from_lines(&lines);
        self.cache.insert(key, outcome.clone());
        Ok(outcome)
    }

    /// Stop the underlying engine. The client cannot be used afterwards.
    pub async fn shutdown(self) {
        self.engine.stop().await;
    }
}

fn white_evaluation(outcome: &SearchOutcome, position: &Position) -> Result<Evaluation, WorkerError> {
    let raw = outcome.score.ok_or_else(|| {
        WorkerError::Protocol(format!("no score reported before bestmove for {}", position.fen))
    })?;
    Ok(Evaluation::from_raw(raw).to_white(position.side_to_move))
}
