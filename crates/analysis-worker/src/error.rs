//! Worker error types

use thiserror::Error;

/// How far a failure reaches once it escapes a single game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Nothing can proceed; abort the whole run.
    Run,
    /// The current game is abandoned and its engine process discarded.
    Game,
    /// The game's input is unusable; skip it and continue.
    Input,
    /// An aggregation invariant broke; abort the batch.
    Batch,
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Engine did not answer within {0}ms")]
    EngineTimeout(u64),

    #[error("Engine process exited")]
    EngineProcessExited,

    #[error("Engine already has a request in flight")]
    ConcurrentRequest,

    #[error("Engine not running")]
    EngineNotRunning,

    #[error("Engine protocol error: {0}")]
    Protocol(String),

    #[error("Tracked player not found in game {0}")]
    PlayerNotIdentified(String),

    #[error("Invalid game: {0}")]
    InvalidGame(String),

    #[error(
        "Outcome conservation violated: {wins} wins + {draws} draws + {losses} losses + {unknown} unknown != {total} games"
    )]
    ResultConservationViolation {
        wins: u32,
        draws: u32,
        losses: u32,
        unknown: u32,
        total: u32,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    pub fn scope(&self) -> ErrorScope {
        match self {
            WorkerError::Config(_)
            | WorkerError::EngineUnavailable(_)
            | WorkerError::Database(_)
            | WorkerError::Json(_) => ErrorScope::Run,
            WorkerError::EngineTimeout(_)
            | WorkerError::EngineProcessExited
            | WorkerError::ConcurrentRequest
            | WorkerError::EngineNotRunning
            | WorkerError::Protocol(_)
            | WorkerError::Io(_) => ErrorScope::Game,
            WorkerError::PlayerNotIdentified(_) | WorkerError::InvalidGame(_) => ErrorScope::Input,
            WorkerError::ResultConservationViolation { .. } => ErrorScope::Batch,
        }
    }
}
