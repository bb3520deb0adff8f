mod types;

pub use types::*;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use stemforged_common::{JobId, JobStatus, PipelineSettings, Stage};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Admin,
    User,
}

/// Events broadcast to the dashboard and any in-process listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AppEvent {
    JobQueued {
        job_id: JobId,
        filename: String,
        source: String,
        category: EventCategory,
    },
    JobClaimed {
        job_id: JobId,
        stage: Stage,
        worker: String,
        category: EventCategory,
    },
    JobAdvanced {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
        category: EventCategory,
    },
    JobRetrying {
        job_id: JobId,
        stage: Stage,
        attempt: u32,
        error: String,
        category: EventCategory,
    },
    JobFailed {
        job_id: JobId,
        stage: Option<Stage>,
        error: String,
        category: EventCategory,
    },
    JobCompleted {
        job_id: JobId,
        output_path: String,
        category: EventCategory,
    },
    SettingsUpdated {
        settings: PipelineSettings,
        category: EventCategory,
    },
}

impl AppEvent {
    pub fn category(&self) -> EventCategory {
        match self {
            AppEvent::JobQueued { category, .. }
            | AppEvent::JobClaimed { category, .. }
            | AppEvent::JobAdvanced { category, .. }
            | AppEvent::JobRetrying { category, .. }
            | AppEvent::JobFailed { category, .. }
            | AppEvent::JobCompleted { category, .. }
            | AppEvent::SettingsUpdated { category, .. } => *category,
        }
    }

    /// Serialized `event_type` tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            AppEvent::JobQueued { .. } => "job_queued",
            AppEvent::JobClaimed { .. } => "job_claimed",
            AppEvent::JobAdvanced { .. } => "job_advanced",
            AppEvent::JobRetrying { .. } => "job_retrying",
            AppEvent::JobFailed { .. } => "job_failed",
            AppEvent::JobCompleted { .. } => "job_completed",
            AppEvent::SettingsUpdated { .. } => "settings_updated",
        }
    }

    pub fn job_queued(job_id: JobId, filename: String, source: String) -> Self {
        AppEvent::JobQueued {
            job_id,
            filename,
            source,
            category: EventCategory::User,
        }
    }

    pub fn job_claimed(job_id: JobId, stage: Stage, worker: String) -> Self {
        AppEvent::JobClaimed {
            job_id,
            stage,
            worker,
            category: EventCategory::Admin,
        }
    }

    pub fn job_advanced(job_id: JobId, from: JobStatus, to: JobStatus) -> Self {
        AppEvent::JobAdvanced {
            job_id,
            from,
            to,
            category: EventCategory::User,
        }
    }

    pub fn job_retrying(job_id: JobId, stage: Stage, attempt: u32, error: String) -> Self {
        AppEvent::JobRetrying {
            job_id,
            stage,
            attempt,
            error,
            category: EventCategory::User,
        }
    }

    pub fn job_failed(job_id: JobId, stage: Option<Stage>, error: String) -> Self {
        AppEvent::JobFailed {
            job_id,
            stage,
            error,
            category: EventCategory::User,
        }
    }

    pub fn job_completed(job_id: JobId, output_path: String) -> Self {
        AppEvent::JobCompleted {
            job_id,
            output_path,
            category: EventCategory::User,
        }
    }

    pub fn settings_updated(settings: PipelineSettings) -> Self {
        AppEvent::SettingsUpdated {
            settings,
            category: EventCategory::Admin,
        }
    }
}

/// Shared in-process state: live settings, stage wake-ups, counters, events.
///
/// The job ledger in SQLite is authoritative for job data; nothing here is
/// required to recover after a restart.
pub struct AppState {
    settings: RwLock<PipelineSettings>,
    stats: RwLock<PipelineStats>,
    queues: StageQueues,
    event_tx: broadcast::Sender<AppEvent>,
}

impl AppState {
    pub fn new(settings: PipelineSettings) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(256);

        Arc::new(Self {
            settings: RwLock::new(settings),
            stats: RwLock::new(PipelineStats::default()),
            queues: StageQueues::default(),
            event_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.event_tx.subscribe()
    }

    pub fn broadcast(&self, event: AppEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::debug!("No subscribers for event");
        }
    }

    /// Current settings. Intake snapshots these into each new job.
    pub fn settings(&self) -> PipelineSettings {
        self.settings.read().clone()
    }

    pub fn replace_settings(&self, settings: PipelineSettings) {
        *self.settings.write() = settings.clone();
        self.broadcast(AppEvent::settings_updated(settings));
    }

    pub fn queues(&self) -> &StageQueues {
        &self.queues
    }

    /// Wake the stage that owns `status`, if any.
    pub fn wake_for_status(&self, status: JobStatus) {
        if let Some(stage) = Stage::for_status(status) {
            self.queues.wake(stage);
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.read().clone()
    }

    pub fn record_completed(&self) {
        self.stats.write().record_success();
    }

    pub fn record_failed(&self, stage: Stage) {
        self.stats.write().record_failure(stage);
    }

    pub fn record_retry(&self) {
        self.stats.write().record_retry();
    }
}
