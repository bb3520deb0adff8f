use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use stemforged_common::Stage;
use tokio::sync::Notify;

/// In-process counters since startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total_processed: u64,
    pub completed: u64,
    pub failed: u64,
    pub retries: u64,
    /// Terminal failures per stage
    pub failures_by_stage: BTreeMap<String, u64>,
}

impl PipelineStats {
    pub fn success_rate(&self) -> f32 {
        if self.total_processed == 0 {
            return 0.0;
        }
        (self.completed as f32 / self.total_processed as f32) * 100.0
    }

    pub fn record_success(&mut self) {
        self.total_processed += 1;
        self.completed += 1;
    }

    pub fn record_failure(&mut self, stage: Stage) {
        self.total_processed += 1;
        self.failed += 1;
        *self
            .failures_by_stage
            .entry(stage.as_str().to_string())
            .or_insert(0) += 1;
    }

    pub fn record_retry(&mut self) {
        self.retries += 1;
    }
}

/// One wake-up queue per stage.
///
/// A notification stores a permit when nobody is waiting, so a wake-up sent
/// while a worker is busy is seen on its next wait. Wake-ups carry no data;
/// the worker always re-reads the ledger.
#[derive(Debug, Default)]
pub struct StageQueues {
    metadata: Notify,
    separation: Notify,
    packaging: Notify,
}

impl StageQueues {
    pub fn get(&self, stage: Stage) -> &Notify {
        match stage {
            Stage::Metadata => &self.metadata,
            Stage::Separation => &self.separation,
            Stage::Packaging => &self.packaging,
        }
    }

    pub fn wake(&self, stage: Stage) {
        self.get(stage).notify_one();
    }
}
