//! Storage interface for analysis output

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::analyzer::GameAnalysisResult;
use crate::batch::{CareerSummary, EngineSummary};
use crate::blunders::BlunderDetail;
use crate::error::WorkerError;

/// Identity of one stored analysis. Re-analysis at another depth or with
/// another engine is a different key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnalysisKey {
    pub game_id: String,
    pub engine_name: String,
    pub engine_version: String,
    pub depth: u32,
}

impl AnalysisKey {
    pub fn for_result(result: &GameAnalysisResult) -> Self {
        Self {
            game_id: result.game_id.clone(),
            engine_name: result.engine_name.clone(),
            engine_version: result.engine_version.clone(),
            depth: result.depth,
        }
    }
}

pub trait AnalysisStore: Send + Sync {
    /// Insert or overwrite the result stored under `key`.
    fn save_game_analysis(
        &self,
        key: &AnalysisKey,
        result: &GameAnalysisResult,
    ) -> impl Future<Output = Result<(), WorkerError>> + Send;

    /// Drop every blunder row under `key`, then insert `details`.
    fn replace_blunders(
        &self,
        key: &AnalysisKey,
        details: &[BlunderDetail],
    ) -> impl Future<Output = Result<(), WorkerError>> + Send;

    fn save_career_summary(
        &self,
        summary: &CareerSummary,
    ) -> impl Future<Output = Result<(), WorkerError>> + Send;

    fn save_engine_summary(
        &self,
        summary: &EngineSummary,
    ) -> impl Future<Output = Result<(), WorkerError>> + Send;
}

#[derive(Default)]
struct MemoryState {
    analyses: BTreeMap<AnalysisKey, GameAnalysisResult>,
    blunders: BTreeMap<AnalysisKey, Vec<BlunderDetail>>,
    career: Option<CareerSummary>,
    engine: Option<EngineSummary>,
    writes: u32,
}

/// In-process store for dry runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn analysis(&self, key: &AnalysisKey) -> Option<GameAnalysisResult> {
        self.state().analyses.get(key).cloned()
    }

    pub fn analysis_count(&self) -> usize {
        self.state().analyses.len()
    }

    pub fn keys(&self) -> Vec<AnalysisKey> {
        self.state().analyses.keys().cloned().collect()
    }

    pub fn blunders(&self, key: &AnalysisKey) -> Vec<BlunderDetail> {
        self.state().blunders.get(key).cloned().unwrap_or_default()
    }

    pub fn blunder_row_count(&self) -> usize {
        self.state().blunders.values().map(Vec::len).sum()
    }

    pub fn career_summary(&self) -> Option<CareerSummary> {
        self.state().career.clone()
    }

    pub fn engine_summary(&self) -> Option<EngineSummary> {
        self.state().engine.clone()
    }

    /// Number of game-level writes received, including overwrites.
    pub fn writes(&self) -> u32 {
        self.state().writes
    }
}

impl AnalysisStore for MemoryStore {
    async fn save_game_analysis(
        &self,
        key: &AnalysisKey,
        result: &GameAnalysisResult,
    ) -> Result<(), WorkerError> {
        let mut state = self.state();
        state.analyses.insert(key.clone(), result.clone());
        state.writes += 1;
        Ok(())
    }

    async fn replace_blunders(
        &self,
        key: &AnalysisKey,
        details: &[BlunderDetail],
    ) -> Result<(), WorkerError> {
        self.state().blunders.insert(key.clone(), details.to_vec());
        Ok(())
    }

    async fn save_career_summary(&self, summary: &CareerSummary) -> Result<(), WorkerError> {
        self.state().career = Some(summary.clone());
        Ok(())
    }

    async fn save_engine_summary(&self, summary: &EngineSummary) -> Result<(), WorkerError> {
        self.state().engine = Some(summary.clone());
        Ok(())
    }
}
