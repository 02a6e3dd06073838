//! Engine-driven game analysis: UCI engine processes, per-game move scoring,
//! blunder themes and career aggregation.

pub mod analysis;
pub mod analyzer;
pub mod batch;
pub mod blunders;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod protocol;
pub mod store;

pub use chess_core;
