pub mod collection;
pub mod settle;

pub use collection::collection_for;
pub use settle::FileSettleTracker;

use crate::config::WatchConfig;
use crate::pipeline::{enqueue_file, IntakeRequest, PipelineContext};
use anyhow::{Context, Result};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use stemforged_common::paths::is_audio_file;
use stemforged_common::JobSource;
use tokio::sync::{mpsc, watch};

/// Watches `input/` and queues audio files once they stop changing
pub struct FileWatcher {
    config: WatchConfig,
    ctx: Arc<PipelineContext>,
    watcher: Option<RecommendedWatcher>,
}

impl FileWatcher {
    pub fn new(config: WatchConfig, ctx: Arc<PipelineContext>) -> Self {
        Self {
            config,
            ctx,
            watcher: None,
        }
    }

    /// Start watching the input directory. Files already present are picked
    /// up as if they had just been written.
    pub fn start(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("File watcher is disabled");
            return Ok(());
        }

        let input = self.ctx.layout.input.clone();
        std::fs::create_dir_all(&input)
            .with_context(|| format!("Failed to create input directory: {:?}", input))?;

        let (event_tx, mut event_rx) = mpsc::channel::<PathBuf>(100);

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    if event.kind.is_create() || event.kind.is_modify() {
                        for path in event.paths.into_iter().filter(|p| is_candidate(p)) {
                            let _ = event_tx.blocking_send(path);
                        }
                    }
                }
            },
            Config::default(),
        )
        .context("Failed to create file watcher")?;

        watcher
            .watch(&input, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch path: {:?}", input))?;
        tracing::info!("Watching directory: {:?}", input);
        self.watcher = Some(watcher);

        let mut settle_tracker = FileSettleTracker::new(self.config.settle_time_secs);
        for path in scan_existing(&input) {
            tracing::debug!("Found existing file: {:?}", path);
            settle_tracker.file_changed(path);
        }

        let ctx = self.ctx.clone();
        let check_every = Duration::from_secs(self.config.settle_time_secs.clamp(1, 5));
        tokio::spawn(async move {
            let mut check_interval = tokio::time::interval(check_every);

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }

                    Some(path) = event_rx.recv() => {
                        tracing::debug!("File event: {:?}", path);
                        settle_tracker.file_changed(path);
                    }

                    _ = check_interval.tick() => {
                        for path in settle_tracker.take_settled() {
                            queue_watched_file(&ctx, &path).await;
                        }
                    }
                }
            }
            tracing::info!("File watcher stopped");
        });

        Ok(())
    }

    /// Stop watching
    pub fn stop(&mut self) {
        self.watcher = None;
    }
}

/// Audio files that are not hidden partial writes.
fn is_candidate(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(true);
    !hidden && is_audio_file(path)
}

/// Audio files already sitting under `dir`.
pub fn scan_existing(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_candidate(e.path()))
        .map(|e| e.into_path())
        .collect()
}

/// Queue a settled file and remove it from `input/` once the queue holds
/// its copy.
pub async fn queue_watched_file(ctx: &PipelineContext, path: &Path) {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return;
    };
    let request = IntakeRequest::new(name, JobSource::Watcher).with_collection(collection_for(path));

    match enqueue_file(ctx, request, path).await {
        Ok(job) => {
            tracing::info!("Queued watcher job {} for: {:?}", job.id, path);
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!("Failed to remove {:?} from input: {}", path, e);
            }
        }
        Err(e) => {
            tracing::warn!("Failed to queue watcher job for {:?}: {}", path, e);
        }
    }
}
