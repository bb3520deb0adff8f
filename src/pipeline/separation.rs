//! Separation stage: `metadata_extracted` → `stems_split`.

use super::{PipelineContext, StageError, StageHandler, StageOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use stemforged_common::{PipelineSettings, SplitterType, Stage, StemCount};
use stemforged_db::models::Job;

pub struct SeparationStage {
    ctx: Arc<PipelineContext>,
}

impl SeparationStage {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

/// Reject a job whose snapshot cannot be satisfied before running any tool.
pub fn preflight(settings: &PipelineSettings) -> Result<(), StageError> {
    if settings.splitter_type == SplitterType::Demucs && settings.stems == StemCount::FIVE {
        return Err(StageError::Configuration(
            "demucs does not provide a 5-stem model; use spleeter or 2/4 stems".into(),
        ));
    }
    settings
        .validate_selection(&settings.selected_stems())
        .map_err(|e| StageError::Configuration(e.to_string()))
}

#[async_trait]
impl StageHandler for SeparationStage {
    fn stage(&self) -> Stage {
        Stage::Separation
    }

    async fn process(&self, job: &Job) -> Result<StageOutcome, StageError> {
        preflight(&job.settings)?;

        let input = self.ctx.layout.queue_file(&job.filename);
        if !input.exists() {
            return Err(StageError::Transient(format!(
                "Queued file not found: {}",
                input.display()
            )));
        }
        let dest = self.ctx.layout.stems_dir(job.id);
        let settings = job.settings.clone();
        let separator = self.ctx.separator.clone();

        tracing::info!(
            "Separating job {} with {} ({} stems)",
            job.id,
            settings.splitter_type,
            settings.stems
        );
        let stems =
            tokio::task::spawn_blocking(move || separator.separate(&input, &dest, &settings))
                .await??;

        tracing::info!(
            "Job {} split into {}",
            job.id,
            stems
                .iter()
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(StageOutcome::default())
    }
}
