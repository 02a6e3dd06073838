//! Postgres storage for analysis results

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::analyzer::GameAnalysisResult;
use crate::batch::{CareerSummary, EngineSummary};
use crate::blunders::BlunderDetail;
use crate::error::WorkerError;
use crate::store::{AnalysisKey, AnalysisStore};

const SCHEMA_SQL: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS game_analysis (
        game_id TEXT NOT NULL,
        engine_name TEXT NOT NULL,
        engine_version TEXT NOT NULL,
        depth INTEGER NOT NULL,
        player_color TEXT NOT NULL,
        opening_name TEXT,
        result TEXT NOT NULL,
        game_length INTEGER NOT NULL,
        tracked_moves INTEGER NOT NULL,
        average_cpl DOUBLE PRECISION,
        opening_cpl DOUBLE PRECISION,
        middlegame_cpl DOUBLE PRECISION,
        endgame_cpl DOUBLE PRECISION,
        accuracy DOUBLE PRECISION,
        blunders INTEGER NOT NULL,
        mistakes INTEGER NOT NULL,
        inaccuracies INTEGER NOT NULL,
        eval_swing_max INTEGER NOT NULL,
        events JSONB NOT NULL,
        analyzed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (game_id, engine_name, engine_version, depth)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS blunder_details (
        game_id TEXT NOT NULL,
        engine_name TEXT NOT NULL,
        engine_version TEXT NOT NULL,
        depth INTEGER NOT NULL,
        ply INTEGER NOT NULL,
        move_number INTEGER NOT NULL,
        phase TEXT NOT NULL,
        player_color TEXT NOT NULL,
        fen_before TEXT NOT NULL,
        move_san TEXT NOT NULL,
        move_uci TEXT NOT NULL,
        best_move TEXT,
        eval_before INTEGER NOT NULL,
        eval_after INTEGER NOT NULL,
        centipawn_loss INTEGER NOT NULL,
        was_capture BOOLEAN NOT NULL,
        theme TEXT NOT NULL,
        PRIMARY KEY (game_id, engine_name, engine_version, depth, ply)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS career_summary (
        id SMALLINT PRIMARY KEY CHECK (id = 1),
        summary JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS engine_summary (
        id SMALLINT PRIMARY KEY CHECK (id = 1),
        engine_name TEXT NOT NULL,
        engine_version TEXT NOT NULL,
        depth INTEGER NOT NULL,
        games_analyzed INTEGER NOT NULL,
        games_failed INTEGER NOT NULL,
        total_blunders INTEGER NOT NULL,
        mean_cpl DOUBLE PRECISION,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
];

/// Analysis storage backed by a Postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, WorkerError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Create the tables if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), WorkerError> {
        for statement in SCHEMA_SQL {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Analysis schema ready");
        Ok(())
    }
}

impl AnalysisStore for PgStore {
    async fn save_game_analysis(
        &self,
        key: &AnalysisKey,
        result: &GameAnalysisResult,
    ) -> Result<(), WorkerError> {
        let events = serde_json::json!({
            "moves": result.events,
            "critical_moments": result.critical_moments,
            "missed_tactics": result.missed_tactics,
            "time_trouble": result.time_trouble,
            "pv_snapshots": result.pv_snapshots,
        });

        sqlx::query(
            r#"INSERT INTO game_analysis (
                game_id, engine_name, engine_version, depth,
                player_color, opening_name, result, game_length, tracked_moves,
                average_cpl, opening_cpl, middlegame_cpl, endgame_cpl, accuracy,
                blunders, mistakes, inaccuracies, eval_swing_max, events
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (game_id, engine_name, engine_version, depth) DO UPDATE SET
                player_color = EXCLUDED.player_color,
                opening_name = EXCLUDED.opening_name,
                result = EXCLUDED.result,
                game_length = EXCLUDED.game_length,
                tracked_moves = EXCLUDED.tracked_moves,
                average_cpl = EXCLUDED.average_cpl,
                opening_cpl = EXCLUDED.opening_cpl,
                middlegame_cpl = EXCLUDED.middlegame_cpl,
                endgame_cpl = EXCLUDED.endgame_cpl,
                accuracy = EXCLUDED.accuracy,
                blunders = EXCLUDED.blunders,
                mistakes = EXCLUDED.mistakes,
                inaccuracies = EXCLUDED.inaccuracies,
                eval_swing_max = EXCLUDED.eval_swing_max,
                events = EXCLUDED.events,
                analyzed_at = NOW()"#,
        )
        .bind(&key.game_id)
        .bind(&key.engine_name)
        .bind(&key.engine_version)
        .bind(key.depth as i32)
        .bind(result.player_color.name())
        .bind(&result.opening_name)
        .bind(&result.result)
        .bind(result.game_length as i32)
        .bind(result.tracked_moves as i32)
        .bind(result.average_centipawn_loss)
        .bind(result.opening_cpl)
        .bind(result.middlegame_cpl)
        .bind(result.endgame_cpl)
        .bind(result.accuracy)
        .bind(result.blunders as i32)
        .bind(result.mistakes as i32)
        .bind(result.inaccuracies as i32)
        .bind(result.eval_swing_max)
        .bind(&events)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn replace_blunders(
        &self,
        key: &AnalysisKey,
        details: &[BlunderDetail],
    ) -> Result<(), WorkerError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM blunder_details WHERE game_id = $1 AND engine_name = $2 AND engine_version = $3 AND depth = $4",
        )
        .bind(&key.game_id)
        .bind(&key.engine_name)
        .bind(&key.engine_version)
        .bind(key.depth as i32)
        .execute(&mut *tx)
        .await?;

        for detail in details {
            sqlx::query(
                r#"INSERT INTO blunder_details (
                    game_id, engine_name, engine_version, depth, ply, move_number, phase,
                    player_color, fen_before, move_san, move_uci, best_move,
                    eval_before, eval_after, centipawn_loss, was_capture, theme
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"#,
            )
            .bind(&key.game_id)
            .bind(&key.engine_name)
            .bind(&key.engine_version)
            .bind(key.depth as i32)
            .bind(detail.ply as i32)
            .bind(detail.move_number as i32)
            .bind(detail.phase.as_str())
            .bind(detail.player_color.name())
            .bind(&detail.fen_before)
            .bind(&detail.move_san)
            .bind(&detail.move_uci)
            .bind(&detail.best_move)
            .bind(detail.eval_before)
            .bind(detail.eval_after)
            .bind(detail.centipawn_loss)
            .bind(detail.was_capture)
            .bind(detail.theme.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn save_career_summary(&self, summary: &CareerSummary) -> Result<(), WorkerError> {
        let payload = serde_json::to_value(summary)?;

        sqlx::query(
            r#"INSERT INTO career_summary (id, summary) VALUES (1, $1)
            ON CONFLICT (id) DO UPDATE SET summary = EXCLUDED.summary, updated_at = NOW()"#,
        )
        .bind(&payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_engine_summary(&self, summary: &EngineSummary) -> Result<(), WorkerError> {
        sqlx::query(
            r#"INSERT INTO engine_summary (
                id, engine_name, engine_version, depth, games_analyzed, games_failed,
                total_blunders, mean_cpl
            ) VALUES (1, $1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                engine_name = EXCLUDED.engine_name,
                engine_version = EXCLUDED.engine_version,
                depth = EXCLUDED.depth,
                games_analyzed = EXCLUDED.games_analyzed,
                games_failed = EXCLUDED.games_failed,
                total_blunders = EXCLUDED.total_blunders,
                mean_cpl = EXCLUDED.mean_cpl,
                updated_at = NOW()"#,
        )
        .bind(&summary.engine_name)
        .bind(&summary.engine_version)
        .bind(summary.depth as i32)
        .bind(summary.games_analyzed as i32)
        .bind(summary.games_failed as i32)
        .bind(summary.total_blunders as i32)
        .bind(summary.mean_cpl)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
