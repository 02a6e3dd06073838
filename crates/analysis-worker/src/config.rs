//! Worker configuration from environment variables

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::batch::BatchSettings;
use crate::engine::EngineOptions;
use crate::error::WorkerError;

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Path to the engine binary
    pub stockfish_path: String,

    /// Search depth per position
    pub analysis_depth: u32,

    /// Names (or name fragments) identifying the tracked player
    pub player_names: Vec<String>,

    /// Games per chunk
    pub batch_chunk_size: usize,

    /// Engine processes allowed at once
    pub max_concurrent_engines: usize,

    pub handshake_timeout: Duration,

    /// Per `go` request
    pub move_timeout: Duration,

    /// Wall-clock limit for one game
    pub game_timeout: Option<Duration>,

    pub engine_threads: u32,
    pub engine_hash_mb: u32,

    /// Postgres URL; without it results stay in memory
    pub database_url: Option<String>,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, WorkerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, WorkerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let stockfish_path = get("STOCKFISH_PATH").unwrap_or_else(|| "stockfish".to_string());
        let analysis_depth: u32 = parse_or(&get, "ANALYSIS_DEPTH", 15)?;
        if analysis_depth == 0 {
            return Err(WorkerError::Config("ANALYSIS_DEPTH must be at least 1".into()));
        }

        let player_names = get("PLAYER_NAMES")
            .map(|names| {
                names
                    .split(',')
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let batch_chunk_size: usize = parse_or(&get, "BATCH_CHUNK_SIZE", 25)?;
        if batch_chunk_size == 0 {
            return Err(WorkerError::Config("BATCH_CHUNK_SIZE must be at least 1".into()));
        }

        let requested_engines: usize = parse_or(&get, "MAX_CONCURRENT_ENGINES", 1)?;
        let cpus = num_cpus::get().max(1);
        let max_concurrent_engines = requested_engines.clamp(1, cpus);
        if max_concurrent_engines != requested_engines {
            warn!(
                requested = requested_engines,
                using = max_concurrent_engines,
                "MAX_CONCURRENT_ENGINES clamped to available CPUs"
            );
        }

        let handshake_timeout = Duration::from_millis(parse_or(&get, "HANDSHAKE_TIMEOUT_MS", 5_000)?);
        let move_timeout = Duration::from_millis(parse_or(&get, "MOVE_TIMEOUT_MS", 30_000)?);
        let game_timeout = match get("GAME_TIMEOUT_SECS") {
            Some(raw) => Some(Duration::from_secs(parse_value("GAME_TIMEOUT_SECS", &raw)?)),
            None => None,
        };

        Ok(Self {
            stockfish_path,
            analysis_depth,
            player_names,
            batch_chunk_size,
            max_concurrent_engines,
            handshake_timeout,
            move_timeout,
            game_timeout,
            engine_threads: parse_or(&get, "ENGINE_THREADS", 1)?,
            engine_hash_mb: parse_or(&get, "ENGINE_HASH_MB", 64)?,
            database_url: get("DATABASE_URL"),
        })
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            threads: self.engine_threads,
            hash_mb: self.engine_hash_mb,
            handshake_timeout: self.handshake_timeout,
        }
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            player_names: self.player_names.clone(),
            depth: self.analysis_depth,
            chunk_size: self.batch_chunk_size,
            max_engines: self.max_concurrent_engines,
            move_timeout: self.move_timeout,
            game_timeout: self.game_timeout,
        }
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, WorkerError> {
    raw.parse()
        .map_err(|_| WorkerError::Config(format!("{key} has invalid value '{raw}'")))
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, WorkerError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<WorkerConfig, WorkerError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]).expect("defaults load");
        assert_eq!(cfg.stockfish_path, "stockfish");
        assert_eq!(cfg.analysis_depth, 15);
        assert!(cfg.player_names.is_empty());
        assert_eq!(cfg.batch_chunk_size, 25);
        assert_eq!(cfg.max_concurrent_engines, 1);
        assert_eq!(cfg.handshake_timeout, Duration::from_secs(5));
        assert_eq!(cfg.move_timeout, Duration::from_secs(30));
        assert_eq!(cfg.game_timeout, None);
        assert_eq!(cfg.engine_hash_mb, 64);
        assert_eq!(cfg.database_url, None);
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("STOCKFISH_PATH", "/opt/sf"),
            ("ANALYSIS_DEPTH", "20"),
            ("PLAYER_NAMES", "alice, Alice_Alt ,,"),
            ("GAME_TIMEOUT_SECS", "90"),
            ("DATABASE_URL", "postgres://localhost/coach"),
        ])
        .expect("valid config");
        assert_eq!(cfg.stockfish_path, "/opt/sf");
        assert_eq!(cfg.analysis_depth, 20);
        assert_eq!(cfg.player_names, vec!["alice", "Alice_Alt"]);
        assert_eq!(cfg.game_timeout, Some(Duration::from_secs(90)));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/coach"));
        assert_eq!(cfg.batch_settings().depth, 20);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config(&[("ANALYSIS_DEPTH", "deep")]),
            Err(WorkerError::Config(msg)) if msg.contains("ANALYSIS_DEPTH")
        ));
        assert!(matches!(
            config(&[("BATCH_CHUNK_SIZE", "0")]),
            Err(WorkerError::Config(_))
        ));
        assert!(matches!(
            config(&[("MOVE_TIMEOUT_MS", "-5")]),
            Err(WorkerError::Config(_))
        ));
    }

    #[test]
    fn test_engines_clamped() {
        let cfg = config(&[("MAX_CONCURRENT_ENGINES", "0")]).expect("valid config");
        assert_eq!(cfg.max_concurrent_engines, 1);
        let cfg = config(&[("MAX_CONCURRENT_ENGINES", "100000")]).expect("valid config");
        assert!(cfg.max_concurrent_engines <= num_cpus::get().max(1));
    }
}
