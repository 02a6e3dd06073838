//! Analysis Worker
//!
//! Analyzes PGN files with a local UCI engine, stores per-game results and
//! prints the career summary as JSON.

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use analysis_worker::batch::{BatchCoordinator, BatchOutcome, GameInput};
use analysis_worker::config::WorkerConfig;
use analysis_worker::db::PgStore;
use analysis_worker::engine::{resolve_engine_path, StockfishLauncher};
use analysis_worker::store::{AnalysisStore, MemoryStore};
use chess_core::pgn::{extract_header, split_games};

#[derive(Debug, Default)]
struct CliArgs {
    pgn_files: Vec<String>,
    depth: Option<u32>,
    dry_run: bool,
}

/// Parse `--pgn <file>` (repeatable), `--depth <n>` and `--dry-run`.
fn parse_args(args: &[String]) -> anyhow::Result<CliArgs> {
    let mut cli = CliArgs::default();
    let mut iter = args.iter().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--pgn" => {
                let file = iter.next().context("--pgn needs a file path")?;
                cli.pgn_files.push(file.clone());
            }
            "--depth" => {
                let raw = iter.next().context("--depth needs a value")?;
                let depth: u32 = raw
                    .parse()
                    .with_context(|| format!("invalid --depth '{raw}'"))?;
                anyhow::ensure!(depth > 0, "--depth must be at least 1");
                cli.depth = Some(depth);
            }
            "--dry-run" => cli.dry_run = true,
            other => anyhow::bail!("unknown argument '{other}'"),
        }
    }

    Ok(cli)
}

/// Site URL's last segment when present, else `<file>#<n>`.
fn game_id_for(pgn: &str, file: &str, index: usize) -> String {
    extract_header(pgn, "Site")
        .or_else(|| extract_header(pgn, "Link"))
        .and_then(|site| {
            site.trim_end_matches('/')
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty() && *s != "?")
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("{file}#{}", index + 1))
}

/// Unparseable games stay in the batch so their results are still tallied.
fn games_from_text(text: &str, file: &str, ingested_at: DateTime<Utc>) -> Vec<GameInput> {
    split_games(text)
        .into_iter()
        .enumerate()
        .map(|(index, pgn)| {
            let input = GameInput::from_pgn(game_id_for(&pgn, file, index), &pgn, ingested_at);
            if let Some(e) = &input.input_error {
                warn!(game_id = %input.id, error = %e, "Unparseable PGN");
            }
            input
        })
        .collect()
}

fn load_games(files: &[String]) -> anyhow::Result<Vec<GameInput>> {
    let mut games = Vec::new();
    let ingested_at = Utc::now();

    for file in files {
        let text = std::fs::read_to_string(file).with_context(|| format!("reading {file}"))?;
        games.extend(games_from_text(&text, file, ingested_at));
    }

    Ok(games)
}

async fn run_batch<S: AnalysisStore>(
    config: &WorkerConfig,
    engine_path: String,
    store: S,
    games: Vec<GameInput>,
) -> anyhow::Result<BatchOutcome> {
    let launcher = StockfishLauncher::new(engine_path, config.engine_options());
    let coordinator = BatchCoordinator::new(launcher, store, config.batch_settings());
    Ok(coordinator.run(games).await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load .env file for local dev
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    let cli = parse_args(&args)?;

    let mut config = WorkerConfig::from_env()?;
    if let Some(depth) = cli.depth {
        config.analysis_depth = depth;
    }
    anyhow::ensure!(
        !config.player_names.is_empty(),
        "PLAYER_NAMES must list at least one name"
    );

    let engine_path = resolve_engine_path(&config.stockfish_path)?;
    info!(
        engine_path = %engine_path,
        depth = config.analysis_depth,
        chunk_size = config.batch_chunk_size,
        engines = config.max_concurrent_engines,
        "Worker config loaded"
    );

    let games = load_games(&cli.pgn_files)?;
    info!(games = games.len(), files = cli.pgn_files.len(), "Games loaded");

    let outcome = match (&config.database_url, cli.dry_run) {
        (Some(url), false) => {
            let store = PgStore::connect(url).await?;
            store.migrate().await?;
            info!("Database connection pool established");
            run_batch(&config, engine_path, store, games).await?
        }
        _ => {
            info!("Using in-memory store");
            run_batch(&config, engine_path, MemoryStore::new(), games).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
