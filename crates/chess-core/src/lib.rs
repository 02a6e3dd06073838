//! Game data shared by the analysis pipeline: PGN parsing, move records and
//! opening names.

pub mod error;
pub mod game_data;
pub mod opening;
pub mod pgn;

pub use error::PgnError;
pub use game_data::{GameData, GameMetadata, MoveRecord, Side};
