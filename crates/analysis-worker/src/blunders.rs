//! Blunder themes and cross-game blunder patterns.
//!
//! A blunder gets exactly one theme: the first rule in [`THEME_RULES`] whose
//! predicate holds. Rule order decides overlapping cases (a 350cp capture is a
//! hanging piece, not a bad capture).

use std::collections::BTreeMap;

use chess_core::Side;
use serde::{Deserialize, Serialize};

use crate::analysis::GamePhase;

/// Magnitude at which an evaluation is treated as a forced mate
pub const MATE_MAGNITUDE: i32 = 90_000;

/// Example games kept per pattern
pub const MAX_PATTERN_EXAMPLES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlunderTheme {
    UnsafeKing,
    HangingPiece,
    BadCapture,
    MissedWin,
    MissedThreat,
}

impl BlunderTheme {
    pub fn as_str(self) -> &'static str {
        match self {
            BlunderTheme::UnsafeKing => "unsafe_king",
            BlunderTheme::HangingPiece => "hanging_piece",
            BlunderTheme::BadCapture => "bad_capture",
            BlunderTheme::MissedWin => "missed_win",
            BlunderTheme::MissedThreat => "missed_threat",
        }
    }
}

/// Inputs to theme classification, all in the mover's perspective.
#[derive(Debug, Clone, Copy)]
pub struct BlunderFacts {
    pub eval_before: i32,
    pub eval_after: i32,
    pub centipawn_loss: i32,
    pub was_capture: bool,
}

pub struct ThemeRule {
    pub theme: BlunderTheme,
    pub applies: fn(&BlunderFacts) -> bool,
}

fn mate_on_either_side(f: &BlunderFacts) -> bool {
    f.eval_before.abs() >= MATE_MAGNITUDE || f.eval_after.abs() >= MATE_MAGNITUDE
}

fn large_material_loss(f: &BlunderFacts) -> bool {
    f.centipawn_loss >= 300
}

fn losing_capture(f: &BlunderFacts) -> bool {
    f.was_capture && f.centipawn_loss >= 150
}

fn thrown_advantage(f: &BlunderFacts) -> bool {
    f.eval_before >= 200 && f.centipawn_loss >= 150
}

fn collapse_from_balance(f: &BlunderFacts) -> bool {
    (-100..=100).contains(&f.eval_before) && f.eval_after <= -150
}

/// Evaluated top to bottom; the first match wins.
pub const THEME_RULES: &[ThemeRule] = &[
    ThemeRule {
        theme: BlunderTheme::UnsafeKing,
        applies: mate_on_either_side,
    },
    ThemeRule {
        theme: BlunderTheme::HangingPiece,
        applies: large_material_loss,
    },
    ThemeRule {
        theme: BlunderTheme::BadCapture,
        applies: losing_capture,
    },
    ThemeRule {
        theme: BlunderTheme::MissedWin,
        applies: thrown_advantage,
    },
    ThemeRule {
        theme: BlunderTheme::MissedThreat,
        applies: collapse_from_balance,
    },
];

/// Theme when no rule matches
pub const DEFAULT_THEME: BlunderTheme = BlunderTheme::MissedThreat;

pub fn classify_blunder(facts: &BlunderFacts) -> BlunderTheme {
    THEME_RULES
        .iter()
        .find(|rule| (rule.applies)(facts))
        .map_or(DEFAULT_THEME, |rule| rule.theme)
}

/// A blunder-threshold move with everything needed to persist and classify it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlunderDetail {
    pub game_id: String,
    pub ply: u32,
    pub move_number: u32,
    pub phase: GamePhase,
    pub player_color: Side,
    pub fen_before: String,
    pub move_san: String,
    pub move_uci: String,
    pub best_move: Option<String>,
    /// Mover's perspective
    pub eval_before: i32,
    /// Mover's perspective
    pub eval_after: i32,
    pub centipawn_loss: i32,
    pub was_capture: bool,
    pub theme: BlunderTheme,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlunderPattern {
    pub theme: BlunderTheme,
    pub phase: GamePhase,
    pub count: u32,
    pub mean_centipawn_loss: i32,
    pub example_game_ids: Vec<String>,
}

/// Ordering key for example selection: loss descending, then game id, then ply.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ExampleKey {
    neg_loss: i64,
    game_id: String,
    ply: u32,
}

#[derive(Default)]
struct PatternBucket {
    count: u32,
    loss_total: i64,
    /// Best key per game, at most MAX_PATTERN_EXAMPLES, sorted
    examples: Vec<ExampleKey>,
}

impl PatternBucket {
    fn add(&mut self, detail: &BlunderDetail) {
        self.count += 1;
        self.loss_total += detail.centipawn_loss as i64;

        let key = ExampleKey {
            neg_loss: -(detail.centipawn_loss as i64),
            game_id: detail.game_id.clone(),
            ply: detail.ply,
        };

        match self.examples.iter().position(|e| e.game_id == key.game_id) {
            Some(i) if key < self.examples[i] => self.examples[i] = key,
            Some(_) => return,
            None => self.examples.push(key),
        }
        self.examples.sort();
        self.examples.truncate(MAX_PATTERN_EXAMPLES);
    }

    fn finish(self, theme: BlunderTheme, phase: GamePhase) -> BlunderPattern {
        let mean = if self.count == 0 {
            0
        } else {
            (self.loss_total as f64 / self.count as f64).round() as i32
        };
        BlunderPattern {
            theme,
            phase,
            count: self.count,
            mean_centipawn_loss: mean,
            example_game_ids: self.examples.into_iter().map(|e| e.game_id).collect(),
        }
    }
}

/// Streaming (theme, phase) aggregation with bounded example lists.
#[derive(Default)]
pub struct PatternAggregator {
    buckets: BTreeMap<(BlunderTheme, GamePhase), PatternBucket>,
}

impl PatternAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, detail: &BlunderDetail) {
        self.buckets
            .entry((detail.theme, detail.phase))
            .or_default()
            .add(detail);
    }

    pub fn extend<'a>(&mut self, details: impl IntoIterator<Item = &'a BlunderDetail>) {
        for detail in details {
            self.add(detail);
        }
    }

    /// Most frequent patterns first.
    pub fn finish(self) -> Vec<BlunderPattern> {
        let mut patterns: Vec<BlunderPattern> = self
            .buckets
            .into_iter()
            .map(|((theme, phase), bucket)| bucket.finish(theme, phase))
            .collect();
        patterns.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then(a.theme.cmp(&b.theme))
                .then(a.phase.cmp(&b.phase))
        });
        patterns
    }
}

pub fn aggregate_patterns(details: &[BlunderDetail]) -> Vec<BlunderPattern> {
    let mut aggregator = PatternAggregator::new();
    aggregator.extend(details);
    aggregator.finish()
}
