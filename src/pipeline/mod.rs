//! The karaoke pipeline: intake and the three processing stages.
//!
//! Stages never hand job data to each other in memory. Each one claims jobs
//! in the status it owns from the ledger, works on files under the data
//! directory, and advances the job so the next stage finds it.

pub mod cover_art;
pub mod intake;
pub mod layout;
pub mod metadata;
pub mod mixer;
pub mod packaging;
pub mod separation;
pub mod separator;
pub mod sidecar;

pub use cover_art::CoverArtClient;
pub use intake::{enqueue_file, enqueue_upload, IntakeRequest};
pub use layout::DataLayout;
pub use metadata::MetadataStage;
pub use mixer::{FfmpegMixer, StemMixer};
pub use packaging::PackagingStage;
pub use separation::SeparationStage;
pub use separator::{Separator, ToolSeparator};

use crate::config::Config;
use crate::notifications::NotificationManager;
use crate::state::AppState;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use stemforged_common::Stage;
use stemforged_db::models::Job;
use stemforged_db::pool::DbPool;

/// Why a stage could not finish a job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    /// The input itself is unusable. Never retried.
    #[error("{0}")]
    Validation(String),

    /// Tool crash, I/O failure and the like. Retried with a fixed delay.
    #[error("{0}")]
    Transient(String),

    /// Settings or environment make the job impossible. Never retried.
    #[error("{0}")]
    Configuration(String),
}

impl StageError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::Transient(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StageError::Validation(_) => "validation",
            StageError::Transient(_) => "transient",
            StageError::Configuration(_) => "configuration",
        }
    }
}

impl From<stemforged_av::Error> for StageError {
    fn from(err: stemforged_av::Error) -> Self {
        use stemforged_av::Error as AvError;
        match err {
            AvError::ToolNotFound { .. } | AvError::Unsupported(_) => {
                StageError::Configuration(err.to_string())
            }
            other => StageError::Transient(other.to_string()),
        }
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        StageError::Transient(format!("I/O error: {}", err))
    }
}

impl From<stemforged_common::Error> for StageError {
    fn from(err: stemforged_common::Error) -> Self {
        StageError::Transient(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StageError::Transient(format!("worker task failed: {}", err))
    }
}

/// What a stage produced for a job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutcome {
    /// Final output file, reported by packaging.
    pub output_path: Option<PathBuf>,
}

/// One pipeline stage. The worker owns claiming and ledger updates; a
/// handler only does the work for a job it has been given.
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn stage(&self) -> Stage;

    async fn process(&self, job: &Job) -> Result<StageOutcome, StageError>;

    /// Runs once the ledger has accepted the result of `process`. `job` is
    /// the advanced row. Failures here are logged and never undo the advance.
    async fn finish(&self, _job: &Job) {}
}

/// Everything the stages and intake share.
pub struct PipelineContext {
    pub db: DbPool,
    pub layout: DataLayout,
    pub state: Arc<AppState>,
    pub separator: Arc<dyn Separator>,
    pub mixer: Arc<dyn StemMixer>,
    pub cover_art: Option<CoverArtClient>,
    pub notifications: NotificationManager,
}

impl PipelineContext {
    /// Context backed by the external tools named in `config`.
    pub fn new(config: &Config, db: DbPool, state: Arc<AppState>) -> Self {
        Self {
            db,
            layout: config.paths.layout(),
            state,
            separator: Arc::new(ToolSeparator::new(config.tools.clone())),
            mixer: Arc::new(FfmpegMixer::new(config.tools.clone())),
            cover_art: config
                .cover_art
                .enabled
                .then(|| CoverArtClient::new(&config.cover_art)),
            notifications: NotificationManager::new(&config.notifications),
        }
    }

    pub fn with_separator(mut self, separator: Arc<dyn Separator>) -> Self {
        self.separator = separator;
        self
    }

    pub fn with_mixer(mut self, mixer: Arc<dyn StemMixer>) -> Self {
        self.mixer = mixer;
        self
    }
}

/// Handler for `stage` sharing `ctx`.
pub fn handler_for(ctx: &Arc<PipelineContext>, stage: Stage) -> Arc<dyn StageHandler> {
    match stage {
        Stage::Metadata => Arc::new(MetadataStage::new(ctx.clone())),
        Stage::Separation => Arc::new(SeparationStage::new(ctx.clone())),
        Stage::Packaging => Arc::new(PackagingStage::new(ctx.clone())),
    }
}
