//! PGN parsing utilities (lightweight, regex-based)

use std::sync::LazyLock;

use regex::Regex;

use crate::error::PgnError;
use crate::game_data::{GameData, GameMetadata};

const STANDARD_START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\[(\w+)\s+"([^"]*)"\]"#).expect("valid header regex"));
static HEADER_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]").expect("valid header line regex"));
static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^}]*\}|;[^\n]*").expect("valid comment regex"));
static VARIATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^()]*\)").expect("valid variation regex"));
static NAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\d+").expect("valid NAG regex"));
static MOVE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.+").expect("valid move number regex"));
static SAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:O-O-O|O-O|[KQRBN]?[a-h]?[1-8]?x?[a-h][1-8](?:=[QRBN])?)$").expect("valid SAN regex")
});

const RESULT_TOKENS: [&str; 4] = ["1-0", "0-1", "1/2-1/2", "*"];

/// Parse a single-game PGN string into a GameData struct.
pub fn parse_pgn(pgn: &str) -> Result<GameData, PgnError> {
    let metadata = parse_headers(pgn);

    // Replay always starts from the initial position
    if extract_header(pgn, "SetUp").as_deref() == Some("1") {
        if let Some(f) = extract_header(pgn, "FEN") {
            if f != STANDARD_START_FEN {
                return Err(PgnError::NonStandardStart(f));
            }
        }
    }

    let moves = extract_moves(pgn);
    if moves.is_empty() {
        return Err(PgnError::NoMoves);
    }

    Ok(GameData {
        metadata,
        moves,
        pgn: pgn.to_string(),
    })
}

/// Header tags only. Missing players default to "Unknown", a missing result to "*".
pub fn parse_headers(pgn: &str) -> GameMetadata {
    let mut metadata = GameMetadata {
        white: "Unknown".to_string(),
        black: "Unknown".to_string(),
        result: "*".to_string(),
        ..GameMetadata::default()
    };
    for cap in HEADER_RE.captures_iter(pgn) {
        let key = &cap[1];
        let value = cap[2].to_string();
        match key {
            "White" => metadata.white = value,
            "Black" => metadata.black = value,
            "Result" => metadata.result = value,
            "Date" => metadata.date = Some(value),
            "TimeControl" => metadata.time_control = Some(value),
            "ECO" => metadata.eco = Some(value),
            "ECOUrl" => metadata.eco_url = Some(value),
            "Opening" => metadata.opening = Some(value),
            "Event" => metadata.event = Some(value),
            "Site" | "Link" => metadata.site = Some(value),
            _ => {}
        }
    }

    metadata
}

/// Split a multi-game PGN export into one string per game.
pub fn split_games(text: &str) -> Vec<String> {
    let mut games = Vec::new();
    let mut current = String::new();
    let mut seen_movetext = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') && seen_movetext {
            games.push(std::mem::take(&mut current));
            seen_movetext = false;
        }
        if !trimmed.is_empty() && !trimmed.starts_with('[') {
            seen_movetext = true;
        }
        current.push_str(line);
        current.push('\n');
    }

    if !current.trim().is_empty() {
        games.push(current);
    }

    games
        .into_iter()
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .collect()
}

/// Extract SAN moves from PGN text (after removing headers, comments, variations).
fn extract_moves(pgn: &str) -> Vec<String> {
    let no_headers = HEADER_LINE_RE.replace_all(pgn, "");
    let no_comments = COMMENT_RE.replace_all(&no_headers, "");

    // Innermost variations first until none remain
    let mut text = no_comments.into_owned();
    loop {
        let stripped = VARIATION_RE.replace_all(&text, "").into_owned();
        if stripped == text {
            break;
        }
        text = stripped;
    }
    let text = NAG_RE.replace_all(&text, "");

    let mut moves = Vec::new();
    for token in text.split_whitespace() {
        // "12." and "12...e5" both carry a move number prefix
        let token = MOVE_NUMBER_RE.replace(token, "");
        if token.is_empty() || RESULT_TOKENS.contains(&token.as_ref()) {
            continue;
        }
        let san = token.trim_end_matches(['+', '#', '!', '?']);
        let san = match san {
            "0-0" => "O-O",
            "0-0-0" => "O-O-O",
            other => other,
        };
        if SAN_RE.is_match(san) {
            moves.push(san.to_string());
        } else {
            // Kept verbatim so replay rejects the game instead of shortening it
            moves.push(token.into_owned());
        }
    }
    moves
}

/// Extract a string value from a PGN header (e.g. WhiteElo, Termination).
pub fn extract_header(pgn: &str, header_name: &str) -> Option<String> {
    let pattern = format!(r#"\[{}\s+"([^"]*)"\]"#, regex::escape(header_name));
    let re = Regex::new(&pattern).ok()?;
    let value = re.captures(pgn)?.get(1)?.as_str().to_string();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
