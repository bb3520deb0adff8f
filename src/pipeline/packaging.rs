//! Packaging stage: `stems_split` → `completed`.
//!
//! Mixes the selected stems, tags the result from the sidecar and files it
//! under `output/<Artist>/<Album>/`.

use super::layout::DataLayout;
use super::sidecar::{read_record, MetadataRecord};
use super::{PipelineContext, StageError, StageHandler, StageOutcome};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stemforged_av::workspace::move_file;
use stemforged_av::{find_stem_file, write_tags, AudioTags, Workspace};
use stemforged_common::paths::dotted_extension;
use stemforged_common::Stage;
use stemforged_db::models::Job;

/// Album artwork file name inside each album directory.
pub const ALBUM_COVER: &str = "cover.jpg";

pub struct PackagingStage {
    ctx: Arc<PipelineContext>,
}

impl PackagingStage {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

/// Paths of the selected stems, in selection order.
pub fn selected_stem_files(stems_dir: &Path, selection: &[String]) -> Result<Vec<PathBuf>, StageError> {
    selection
        .iter()
        .map(|stem| {
            find_stem_file(stems_dir, stem).ok_or_else(|| {
                StageError::Configuration(format!(
                    "Selected stem '{}' is missing from {}",
                    stem,
                    stems_dir.display()
                ))
            })
        })
        .collect()
}

#[async_trait]
impl StageHandler for PackagingStage {
    fn stage(&self) -> Stage {
        Stage::Packaging
    }

    async fn process(&self, job: &Job) -> Result<StageOutcome, StageError> {
        let layout = &self.ctx.layout;
        let selection = job.stem_selection();
        let stems = selected_stem_files(&layout.stems_dir(job.id), &selection)?;
        let record = read_record(&layout.sidecar(job.id))?;

        let ext = dotted_extension(Path::new(&job.filename));
        let output = layout.output_file(&record.artist, &record.album, &record.title, &ext);
        let bitrate = job.settings.output_bitrate.clone();
        let mixer = self.ctx.mixer.clone();

        tracing::info!(
            "Packaging job {}: mixing {} into {}",
            job.id,
            selection.join(", "),
            output.display()
        );

        let target = output.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StageError> {
            let album_dir = target
                .parent()
                .ok_or_else(|| StageError::Transient("output path has no parent".into()))?
                .to_path_buf();
            let work = Workspace::new_in(&album_dir, &target)?;
            mixer.mix(&stems, work.output(), &bitrate)?;

            let cover = match record.cover_art_path.as_deref() {
                Some(path) => Some(std::fs::read(path)?),
                None => None,
            };
            write_tags(work.output(), &tags_for(&record), cover.as_deref())?;
            work.finalize(&target)?;

            if let Some(ref cover_path) = record.cover_art_path {
                place_album_cover(cover_path, &album_dir);
            }
            Ok(())
        })
        .await??;

        Ok(StageOutcome {
            output_path: Some(output),
        })
    }

    async fn finish(&self, job: &Job) {
        let layout = self.ctx.layout.clone();
        let job = job.clone();
        let result = tokio::task::spawn_blocking(move || {
            log_processed(&layout, &job);
            cleanup(&layout, &job);
        })
        .await;
        if let Err(e) = result {
            tracing::warn!("Post-packaging cleanup task failed: {}", e);
        }
    }
}

fn tags_for(record: &MetadataRecord) -> AudioTags {
    AudioTags {
        artist: Some(record.artist.clone()),
        album: Some(record.album.clone()),
        title: Some(record.title.clone()),
        track_number: record.track_number,
        year: record.year,
    }
}

/// Copy the job's cover to `<album>/cover.jpg` unless one is already there.
fn place_album_cover(cover: &Path, album_dir: &Path) {
    let dest = album_dir.join(ALBUM_COVER);
    if dest.exists() {
        return;
    }
    if let Err(e) = std::fs::copy(cover, &dest) {
        tracing::warn!("Failed to copy cover art to {:?}: {}", dest, e);
    }
}

/// Append a line to `logs/processed.log`.
fn log_processed(layout: &DataLayout, job: &Job) {
    let line = format!(
        "{}\t{}\t{}\t{}\t{}\n",
        job.completed_at.unwrap_or(job.updated_at).to_rfc3339(),
        job.id,
        job.original_filename,
        job.settings.stem_types,
        job.output_path.as_deref().unwrap_or("")
    );
    let path = layout.processed_log();
    let result = path
        .parent()
        .map(std::fs::create_dir_all)
        .transpose()
        .and_then(|_| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
        })
        .and_then(|mut f| f.write_all(line.as_bytes()));
    if let Err(e) = result {
        tracing::warn!("Failed to append to {:?}: {}", path, e);
    }
}

/// Remove or archive intermediates of a completed job.
fn cleanup(layout: &DataLayout, job: &Job) {
    let queued = layout.queue_file(&job.filename);
    remove_quietly(&layout.jobstate_file(&job.filename));

    if job.settings.cleanup_intermediate {
        let stems = layout.stems_dir(job.id);
        if stems.exists() {
            if let Err(e) = std::fs::remove_dir_all(&stems) {
                tracing::warn!("Failed to remove {:?}: {}", stems, e);
            }
        }
        if let Ok(record) = read_record(&layout.sidecar(job.id)) {
            if let Some(cover) = record.cover_art_path {
                remove_quietly(&cover);
            }
        }
        remove_quietly(&layout.sidecar(job.id));
        remove_quietly(&queued);
    } else if queued.exists() {
        let dest = layout.archive_file(&job.filename);
        let moved = std::fs::create_dir_all(&layout.archive).and_then(|_| move_file(&queued, &dest));
        if let Err(e) = moved {
            tracing::warn!("Failed to archive {:?}: {}", queued, e);
        }
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {:?}: {}", path, e),
    }
}
