#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use analysis_worker::batch::{BatchSettings, GameInput};
use analysis_worker::engine::{EngineLauncher, EngineOptions, EngineProcess};
use analysis_worker::error::WorkerError;
use chrono::DateTime;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// What the scripted engine does with one `go`.
pub enum Reply {
    /// Print these lines (the last one should be `bestmove ...`)
    Lines(Vec<String>),
    /// Close both streams, as if the process died
    Exit,
    /// Never answer
    Silent,
}

type Script = Arc<dyn Fn(&str, u32) -> Reply + Send + Sync>;

/// In-process UCI engine driven by a script of (fen, depth) -> reply.
#[derive(Clone)]
pub struct FakeEngine {
    script: Script,
    id_name: String,
    answers_uci: bool,
    options: EngineOptions,
    searches: Arc<AtomicUsize>,
    launches: Arc<AtomicUsize>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl FakeEngine {
    pub fn new(script: impl Fn(&str, u32) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            script: Arc::new(script),
            id_name: "Stockfish 16.1".to_string(),
            answers_uci: true,
            options: EngineOptions {
                handshake_timeout: Duration::from_millis(300),
                ..EngineOptions::default()
            },
            searches: Arc::new(AtomicUsize::new(0)),
            launches: Arc::new(AtomicUsize::new(0)),
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Never sends `uciok`.
    pub fn without_handshake(mut self) -> Self {
        self.answers_uci = false;
        self
    }

    pub fn with_id_name(mut self, id_name: &str) -> Self {
        self.id_name = id_name.to_string();
        self
    }

    /// Number of `go` commands received across every launched instance.
    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub async fn connect(&self) -> Result<EngineProcess, WorkerError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let (client_writer, engine_stdin) = tokio::io::duplex(64 * 1024);
        let (engine_stdout, client_reader) = tokio::io::duplex(64 * 1024);
        tokio::spawn(self.clone().serve(engine_stdin, engine_stdout));
        EngineProcess::connect(client_reader, client_writer, self.options.clone()).await
    }

    async fn serve(self, stdin: DuplexStream, mut stdout: DuplexStream) {
        let mut lines = BufReader::new(stdin).lines();
        let mut fen = START_FEN.to_string();

        while let Ok(Some(line)) = lines.next_line().await {
            self.commands.lock().unwrap().push(line.clone());

            let reply: Vec<String> = match line.split_whitespace().next() {
                Some("uci") if self.answers_uci => vec![
                    format!("id name {}", self.id_name),
                    "id author test".to_string(),
                    "option name Hash type spin default 16 min 1 max 1024".to_string(),
                    "uciok".to_string(),
                ],
                Some("isready") => vec!["readyok".to_string()],
                Some("position") => {
                    if let Some(rest) = line.strip_prefix("position fen ") {
                        fen = rest.trim().to_string();
                    }
                    Vec::new()
                }
                Some("go") => {
                    let depth = line
                        .split_whitespace()
                        .nth(2)
                        .and_then(|d| d.parse().ok())
                        .unwrap_or(1);
                    self.searches.fetch_add(1, Ordering::SeqCst);
                    match (self.script)(&fen, depth) {
                        Reply::Lines(lines) => lines,
                        Reply::Exit => return,
                        Reply::Silent => Vec::new(),
                    }
                }
                Some("quit") => return,
                _ => Vec::new(),
            };

            for out in reply {
                if stdout.write_all(format!("{out}\n").as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    }
}

impl EngineLauncher for FakeEngine {
    async fn launch(&self) -> Result<EngineProcess, WorkerError> {
        self.connect().await
    }
}

/// `info ... score <score> ... pv <moves>` followed by `bestmove`.
pub fn search_reply(score: &str, pv: &[&str]) -> Reply {
    let best = pv.first().copied().unwrap_or("(none)");
    Reply::Lines(vec![
        "info string NNUE evaluation enabled".to_string(),
        format!("info depth 1 seldepth 1 multipv 1 score cp 0 nodes 20 pv {best}"),
        format!(
            "info depth 12 seldepth 16 multipv 1 score {score} nodes 48000 nps 900000 pv {}",
            pv.join(" ")
        ),
        format!("bestmove {best}"),
    ])
}

/// Every position scores `cp` for the side to move.
pub fn constant_engine(cp: i32) -> FakeEngine {
    FakeEngine::new(move |_, _| search_reply(&format!("cp {cp}"), &["e2e4", "e7e5"]))
}

/// Material balance for the side to move, in centipawns.
pub fn material_engine() -> FakeEngine {
    FakeEngine::new(|fen, _| {
        let cp = material_for_side_to_move(fen);
        search_reply(&format!("cp {cp}"), &["a2a3"])
    })
}

pub fn material_for_side_to_move(fen: &str) -> i32 {
    let board = fen.split_whitespace().next().unwrap_or("");
    let white: i32 = board
        .chars()
        .map(|c| match c {
            'P' => 100,
            'N' | 'B' => 300,
            'R' => 500,
            'Q' => 900,
            'p' => -100,
            'n' | 'b' => -300,
            'r' => -500,
            'q' => -900,
            _ => 0,
        })
        .sum();
    if side_to_move(fen) == 'w' {
        white
    } else {
        -white
    }
}

pub fn side_to_move(fen: &str) -> char {
    fen.split_whitespace()
        .nth(1)
        .and_then(|s| s.chars().next())
        .unwrap_or('w')
}

pub fn fullmove(fen: &str) -> u32 {
    fen.split_whitespace()
        .nth(5)
        .and_then(|n| n.parse().ok())
        .unwrap_or(1)
}

pub fn pgn(white: &str, black: &str, result: &str, date: &str, opening: Option<&str>, moves: &str) -> String {
    let mut text = format!(
        "[Event \"Live Chess\"]\n[Date \"{date}\"]\n[White \"{white}\"]\n[Black \"{black}\"]\n[Result \"{result}\"]\n"
    );
    if let Some(opening) = opening {
        text.push_str(&format!("[Opening \"{opening}\"]\n"));
    }
    text.push_str(&format!("\n{moves} {result}\n"));
    text
}

pub fn game_input(id: &str, pgn_text: &str, ingested_secs: i64) -> GameInput {
    GameInput::from_pgn(
        id,
        pgn_text,
        DateTime::from_timestamp(ingested_secs, 0).expect("valid timestamp"),
    )
}

pub fn settings(player: &str) -> BatchSettings {
    BatchSettings {
        player_names: vec![player.to_string()],
        depth: 12,
        chunk_size: 3,
        max_engines: 1,
        move_timeout: Duration::from_secs(2),
        game_timeout: None,
    }
}
