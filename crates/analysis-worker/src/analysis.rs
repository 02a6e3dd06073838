/// Move classification, phases and accuracy. Pure functions only
/// (no engine or board dependencies).

use serde::{Deserialize, Serialize};

/// Classification thresholds (centipawn loss), checked high to low
pub const THRESHOLD_BLUNDER: i32 = 200;
pub const THRESHOLD_MISTAKE: i32 = 100;
pub const THRESHOLD_INACCURACY: i32 = 50;

/// Last full-move number of each phase
pub const OPENING_LAST_MOVE: u32 = 15;
pub const MIDDLEGAME_LAST_MOVE: u32 = 30;

/// Swing between consecutive tracked evaluations that marks a critical moment
pub const CRITICAL_SWING: i32 = 300;

/// Best-vs-played gap that flags a missed tactic
pub const MISSED_TACTIC_GAP: i32 = 100;

/// Blunders after this move number count as time trouble
pub const TIME_TROUBLE_MOVE: u32 = 30;

/// Every Nth tracked move gets a principal variation snapshot
pub const PV_SNAPSHOT_INTERVAL: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GamePhase {
    Opening,
    Middlegame,
    Endgame,
}

impl GamePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            GamePhase::Opening => "opening",
            GamePhase::Middlegame => "middlegame",
            GamePhase::Endgame => "endgame",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveCategory {
    Blunder,
    Mistake,
    Inaccuracy,
}

pub fn phase_for_move(move_number: u32) -> GamePhase {
    if move_number <= OPENING_LAST_MOVE {
        GamePhase::Opening
    } else if move_number <= MIDDLEGAME_LAST_MOVE {
        GamePhase::Middlegame
    } else {
        GamePhase::Endgame
    }
}

/// First threshold met wins, so the categories never overlap.
pub fn classify_loss(cp_loss: i32) -> Option<MoveCategory> {
    if cp_loss >= THRESHOLD_BLUNDER {
        Some(MoveCategory::Blunder)
    } else if cp_loss >= THRESHOLD_MISTAKE {
        Some(MoveCategory::Mistake)
    } else if cp_loss >= THRESHOLD_INACCURACY {
        Some(MoveCategory::Inaccuracy)
    } else {
        None
    }
}

/// Loss of the played move against the engine's best, both in the mover's
/// perspective. Never negative.
pub fn centipawn_loss(best_eval: i32, after_eval: i32) -> i32 {
    (best_eval as i64 - after_eval as i64).max(0) as i32
}

pub fn is_missed_tactic(best_move: Option<&str>, played_uci: &str, best_eval: i32, after_eval: i32) -> bool {
    match best_move {
        Some(best) if best != played_uci => (best_eval as i64 - after_eval as i64).abs() > MISSED_TACTIC_GAP as i64,
        _ => false,
    }
}

pub fn is_time_trouble(category: Option<MoveCategory>, move_number: u32) -> bool {
    category == Some(MoveCategory::Blunder) && move_number > TIME_TROUBLE_MOVE
}

/// Mean of the observations; None when there are none.
pub fn average(values: &[i32]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let total: i64 = values.iter().map(|&v| v as i64).sum();
    Some(total as f64 / values.len() as f64)
}

/// `100 - acpl / 2`, clamped to 0..=100.
pub fn calculate_accuracy(losses: &[i32]) -> Option<f64> {
    average(losses).map(|acpl| (100.0 - acpl / 2.0).clamp(0.0, 100.0))
}
