//! UCI output line classification.
//!
//! Every line the engine prints is turned into zero or more [`EngineLine`]
//! tokens. A search reply is then folded into a [`SearchOutcome`], where later
//! tokens overwrite earlier ones: iterative deepening prints shallow results
//! first, so the last score and the last principal variation are the deepest.

/// Raw score as printed by the engine, from the side to move's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawScore {
    Cp(i32),
    Mate(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    UciOk,
    ReadyOk,
    IdName(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineLine {
    Handshake(Handshake),
    ScoreCp(i32),
    ScoreMate(i32),
    PrincipalVariation(Vec<String>),
    BestMove { mv: String, ponder: Option<String> },
    Unrecognized,
}

/// Classify one line of engine output.
pub fn classify_line(line: &str) -> Vec<EngineLine> {
    let trimmed = line.trim();
    let mut parts = trimmed.split_whitespace();

    match parts.next() {
        Some("uciok") => vec![EngineLine::Handshake(Handshake::UciOk)],
        Some("readyok") => vec![EngineLine::Handshake(Handshake::ReadyOk)],
        Some("id") => match parts.next() {
            Some("name") => {
                let name = parts.collect::<Vec<_>>().join(" ");
                vec![EngineLine::Handshake(Handshake::IdName(name))]
            }
            _ => vec![EngineLine::Unrecognized],
        },
        Some("bestmove") => match parts.next() {
            Some(mv) => {
                let ponder = match parts.next() {
                    Some("ponder") => parts.next().map(str::to_string),
                    _ => None,
                };
                vec![EngineLine::BestMove {
                    mv: mv.to_string(),
                    ponder,
                }]
            }
            None => vec![EngineLine::Unrecognized],
        },
        Some("info") => {
            let tokens = classify_info(trimmed);
            if tokens.is_empty() {
                vec![EngineLine::Unrecognized]
            } else {
                tokens
            }
        }
        _ => vec![EngineLine::Unrecognized],
    }
}

fn classify_info(line: &str) -> Vec<EngineLine> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let mut tokens = Vec::new();
    let mut i = 1;

    while i < parts.len() {
        match parts[i] {
            // Free text until end of line
            "string" => break,
            "score" if i + 2 < parts.len() => {
                match (parts[i + 1], parts[i + 2].parse::<i32>()) {
                    ("cp", Ok(cp)) => tokens.push(EngineLine::ScoreCp(cp)),
                    ("mate", Ok(mate)) => tokens.push(EngineLine::ScoreMate(mate)),
                    _ => {}
                }
                i += 3;
            }
            // A standalone "pv" token; "multipv" is a different token entirely
            "pv" => {
                let moves: Vec<String> = parts[i + 1..]
                    .iter()
                    .take_while(|p| !p.starts_with("bmc") && **p != "string")
                    .map(|p| p.to_string())
                    .collect();
                if !moves.is_empty() {
                    tokens.push(EngineLine::PrincipalVariation(moves));
                }
                break;
            }
            _ => i += 1,
        }
    }

    tokens
}

/// Everything a single `go` request produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOutcome {
    pub score: Option<RawScore>,
    pub best_move: Option<String>,
    pub ponder: Option<String>,
    pub principal_variation: Vec<String>,
}

impl SearchOutcome {
    pub fn from_lines<S: AsRef<str>>(lines: &[S]) -> Self {
        let mut outcome = SearchOutcome::default();
        for line in lines {
            for token in classify_line(line.as_ref()) {
                outcome.absorb(token);
            }
        }
        outcome
    }

    /// Fold one token in. Scores and lines are last-wins.
    pub fn absorb(&mut self, token: EngineLine) {
        match token {
            EngineLine::ScoreCp(cp) => self.score = Some(RawScore::Cp(cp)),
            EngineLine::ScoreMate(mate) => self.score = Some(RawScore::Mate(mate)),
            EngineLine::PrincipalVariation(moves) => self.principal_variation = moves,
            EngineLine::BestMove { mv, ponder } => {
                // "(none)" when the side to move has no legal moves
                self.best_move = (mv != "(none)").then_some(mv);
                self.ponder = ponder;
            }
            EngineLine::Handshake(_) | EngineLine::Unrecognized => {}
        }
    }
}

pub fn is_best_move_line(line: &str) -> bool {
    line.trim_start().starts_with("bestmove")
}
