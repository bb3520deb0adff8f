//! Long-lived stage workers.
//!
//! A worker claims jobs in its stage's input status, hands each to the
//! stage handler and turns the result into a ledger update. It is woken by
//! the stage's notification queue and falls back to polling.

use crate::config::WorkersConfig;
use crate::pipeline::layout::DataLayout;
use crate::pipeline::sidecar::{write_json_atomic, JobState};
use crate::pipeline::{PipelineContext, StageError, StageHandler, StageOutcome};
use crate::state::AppEvent;
use std::sync::Arc;
use std::time::Duration;
use stemforged_av::workspace::move_file;
use stemforged_common::{Error, JobStatus, Stage};
use stemforged_db::models::Job;
use stemforged_db::pool::get_conn;
use stemforged_db::queries::jobs::{self, FailureOutcome};
use tokio::sync::watch;

pub struct StageWorker {
    ctx: Arc<PipelineContext>,
    handler: Arc<dyn StageHandler>,
    worker_id: String,
    poll_interval: Duration,
    claim_timeout: chrono::Duration,
}

impl StageWorker {
    pub fn new(ctx: Arc<PipelineContext>, handler: Arc<dyn StageHandler>, config: &WorkersConfig) -> Self {
        let name = format!("{}-{}", handler.stage(), &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let worker_id = jobs::worker_id(&config.instance_id, &name);
        Self {
            ctx,
            handler,
            worker_id,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(10)),
            claim_timeout: chrono::Duration::seconds(config.claim_timeout_secs as i64),
        }
    }

    pub fn stage(&self) -> Stage {
        self.handler.stage()
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Process jobs until `shutdown` flips to true or its sender is dropped.
    /// A job in progress is always finished first.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let stage = self.stage();
        tracing::info!("{} worker {} started", stage, self.worker_id);

        loop {
            while !*shutdown.borrow() && self.tick().await {}
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = self.ctx.state.queues().get(stage).notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {
                    self.release_stale_claims();
                }
            }
        }

        tracing::info!("{} worker {} stopped", stage, self.worker_id);
    }

    /// Claim and process at most one job. Returns whether a job was claimed.
    pub async fn tick(&self) -> bool {
        let stage = self.stage();
        let claimed = get_conn(&self.ctx.db)
            .and_then(|conn| jobs::claim_next(&conn, stage.input_status(), &self.worker_id));
        let job = match claimed {
            Ok(Some(job)) => job,
            Ok(None) => return false,
            Err(e) => {
                tracing::error!("{} worker failed to claim a job: {}", stage, e);
                return false;
            }
        };

        tracing::debug!("{} claimed job {} ({})", self.worker_id, job.id, job.filename);
        self.ctx
            .state
            .broadcast(AppEvent::job_claimed(job.id, stage, self.worker_id.clone()));

        match self.handler.process(&job).await {
            Ok(outcome) => self.advance(&job, outcome).await,
            Err(err) if err.is_retryable() => self.retry_or_fail(&job, err).await,
            Err(err) => self.fail(&job, err).await,
        }
        true
    }

    async fn advance(&self, job: &Job, outcome: StageOutcome) {
        let output = outcome
            .output_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());
        let advanced = get_conn(&self.ctx.db).and_then(|conn| {
            jobs::advance_job(&conn, job.id, job.status, &self.worker_id, output.as_deref())
        });

        let updated = match advanced {
            Ok(updated) => updated,
            Err(e) => {
                tracing::warn!("Job {} finished {} but was not advanced: {}", job.id, self.stage(), e);
                self.release_unless_lost(job, &e);
                return;
            }
        };

        tracing::info!("Job {} advanced {} -> {}", updated.id, job.status, updated.status);
        mirror_state(&self.ctx.layout, &updated);
        self.ctx
            .state
            .broadcast(AppEvent::job_advanced(updated.id, job.status, updated.status));

        if updated.status == JobStatus::Completed {
            self.ctx.state.record_completed();
            self.ctx.state.broadcast(AppEvent::job_completed(
                updated.id,
                updated.output_path.clone().unwrap_or_default(),
            ));
        }

        self.handler.finish(&updated).await;
        self.ctx.state.wake_for_status(updated.status);
    }

    async fn retry_or_fail(&self, job: &Job, err: StageError) {
        let stage = self.stage();
        let message = err.to_string();
        let delay = chrono::Duration::seconds(job.settings.retry_delay_secs as i64);
        let recorded = get_conn(&self.ctx.db).and_then(|conn| {
            jobs::record_stage_failure(
                &conn,
                job.id,
                stage,
                &self.worker_id,
                &message,
                job.settings.max_retries,
                delay,
            )
        });

        match recorded {
            Ok(FailureOutcome::Retrying { attempt, not_before }) => {
                tracing::warn!(
                    "Job {} failed {} attempt {}/{}: {}. Retrying after {}",
                    job.id,
                    stage,
                    attempt,
                    job.settings.max_retries,
                    message,
                    not_before
                );
                self.ctx.state.record_retry();
                self.ctx
                    .state
                    .broadcast(AppEvent::job_retrying(job.id, stage, attempt, message));

                let state = self.ctx.state.clone();
                let wait = delay.to_std().unwrap_or_default();
                tokio::spawn(async move {
                    tokio::time::sleep(wait).await;
                    state.queues().wake(stage);
                });
            }
            Ok(FailureOutcome::Exhausted(failed)) => self.on_terminal(failed).await,
            Err(e) => {
                tracing::warn!("Could not record failure of job {}: {}", job.id, e);
                self.release(job);
            }
        }
    }

    /// Hand a claimed job back untouched so it can be picked up again.
    fn release(&self, job: &Job) {
        match get_conn(&self.ctx.db).and_then(|conn| jobs::release_claim(&conn, job.id, &self.worker_id)) {
            Ok(true) => self.ctx.state.queues().wake(self.stage()),
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to release claim on job {}: {}", job.id, e),
        }
    }

    /// A conflict means another worker owns the job now; anything else
    /// leaves our claim in place, so hand it back.
    fn release_unless_lost(&self, job: &Job, err: &Error) {
        if !matches!(err, Error::Conflict(_)) {
            self.release(job);
        }
    }

    async fn fail(&self, job: &Job, err: StageError) {
        let failed = get_conn(&self.ctx.db)
            .and_then(|conn| jobs::fail_job(&conn, job.id, Some(&self.worker_id), &err.to_string()));
        match failed {
            Ok(failed) => self.on_terminal(failed).await,
            Err(e) => {
                tracing::warn!("Could not fail job {}: {}", job.id, e);
                self.release_unless_lost(job, &e);
            }
        }
    }

    /// Quarantine the queued file and report a job that reached `error`.
    async fn on_terminal(&self, failed: Job) {
        let stage = self.stage();
        let message = failed.error.clone().unwrap_or_default();
        tracing::error!("Job {} failed in {}: {}", failed.id, stage, message);

        let layout = self.ctx.layout.clone();
        let moved = failed.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || quarantine(&layout, &moved)).await {
            tracing::warn!("Quarantine task for job {} failed: {}", failed.id, e);
        }

        self.ctx.state.record_failed(stage);
        self.ctx
            .state
            .broadcast(AppEvent::job_failed(failed.id, Some(stage), message.clone()));
        self.ctx
            .notifications
            .notify_failure(stage, &failed.original_filename, &message)
            .await;
    }

    /// Release claims older than the claim timeout.
    fn release_stale_claims(&self) {
        let cutoff = chrono::Utc::now() - self.claim_timeout;
        match get_conn(&self.ctx.db).and_then(|conn| jobs::release_stale_claims(&conn, cutoff)) {
            Ok(0) => {}
            Ok(n) => {
                tracing::warn!("Released {} stale claims", n);
                for stage in Stage::ALL {
                    self.ctx.state.queues().wake(stage);
                }
            }
            Err(e) => tracing::warn!("Failed to release stale claims: {}", e),
        }
    }
}

/// Refresh `queue/<file>.jobstate.json` while the queued file is still there.
pub fn mirror_state(layout: &DataLayout, job: &Job) {
    if !layout.queue_file(&job.filename).exists() {
        return;
    }
    if let Err(e) = write_json_atomic(&layout.jobstate_file(&job.filename), &JobState::from(job)) {
        tracing::warn!("Failed to update job state for {}: {}", job.filename, e);
    }
}

/// Move a failed job's queued file and its state mirror into `error/`.
pub fn quarantine(layout: &DataLayout, job: &Job) {
    mirror_state(layout, job);
    if let Err(e) = std::fs::create_dir_all(&layout.error) {
        tracing::warn!("Failed to create {:?}: {}", layout.error, e);
        return;
    }

    let state_name = format!("{}.jobstate.json", job.filename);
    for (from, to) in [
        (layout.queue_file(&job.filename), layout.error_file(&job.filename)),
        (layout.jobstate_file(&job.filename), layout.error_file(&state_name)),
    ] {
        if !from.exists() {
            continue;
        }
        if let Err(e) = move_file(&from, &to) {
            tracing::warn!("Failed to move {:?} to {:?}: {}", from, to, e);
        }
    }
}

/// Spawn one worker per stage sharing `ctx`.
pub fn spawn_all(
    ctx: &Arc<PipelineContext>,
    config: &WorkersConfig,
    shutdown: &watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    Stage::ALL
        .iter()
        .map(|stage| {
            let handler = crate::pipeline::handler_for(ctx, *stage);
            let worker = StageWorker::new(ctx.clone(), handler, config);
            tokio::spawn(worker.run(shutdown.clone()))
        })
        .collect()
}
