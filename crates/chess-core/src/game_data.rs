use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The side a player controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    /// Side to move at a 0-based ply of a game from the standard start.
    pub fn for_ply(ply: u32) -> Side {
        if ply % 2 == 0 {
            Side::White
        } else {
            Side::Black
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Side::White => "white",
            Side::Black => "black",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameMetadata {
    pub white: String,
    pub black: String,
    pub result: String, // "1-0", "0-1", "1/2-1/2", "*"
    pub date: Option<String>,
    pub time_control: Option<String>,
    pub eco: Option<String>,
    pub eco_url: Option<String>,
    pub opening: Option<String>,
    pub event: Option<String>,
    pub site: Option<String>,
}

impl GameMetadata {
    /// Calendar date of the game, if the Date header is complete.
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        self.date.as_deref().and_then(parse_game_date)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameData {
    pub metadata: GameMetadata,
    pub moves: Vec<String>, // SAN notation
    pub pgn: String,
}

impl GameData {
    /// Ordered move records, one per ply.
    pub fn move_records(&self) -> Vec<MoveRecord> {
        self.moves
            .iter()
            .enumerate()
            .map(|(ply, san)| MoveRecord::new(ply as u32, san.clone()))
            .collect()
    }
}

/// One ply of a game as supplied by the move source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// 0-based ply index
    pub ply: u32,
    pub move_number: u32,
    pub san: String,
    pub side_to_move: Side,
}

impl MoveRecord {
    pub fn new(ply: u32, san: String) -> Self {
        Self {
            ply,
            move_number: move_number_for_ply(ply),
            san,
            side_to_move: Side::for_ply(ply),
        }
    }
}

/// Full-move number of a 0-based ply: `ceil((ply + 1) / 2)`.
pub fn move_number_for_ply(ply: u32) -> u32 {
    (ply + 2) / 2
}

/// Parse a PGN Date header ("2024.03.17"). Unknown parts ("????.??.??") yield None.
pub fn parse_game_date(date: &str) -> Option<NaiveDate> {
    let date = date.trim();
    NaiveDate::parse_from_str(date, "%Y.%m.%d")
        .or_else(|_| NaiveDate::parse_from_str(date, "%Y-%m-%d"))
        .ok()
}
