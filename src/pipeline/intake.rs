//! Admitting files into the pipeline.

use super::sidecar::{write_json_atomic, JobState};
use super::PipelineContext;
use crate::state::AppEvent;
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};
use stemforged_common::paths::{dotted_extension, is_allowed_filename, sanitize_component};
use stemforged_common::{CollectionInfo, Error, JobId, JobSource, Result, Stage};
use stemforged_db::models::Job;
use stemforged_db::pool::get_conn;
use stemforged_db::queries::jobs::{self, NewJob};

/// Who is submitting a file and with which options.
#[derive(Debug, Clone)]
pub struct IntakeRequest {
    pub original_filename: String,
    pub source: JobSource,
    /// Comma-separated stems replacing the default selection.
    pub stem_override: Option<String>,
    pub collection: Option<CollectionInfo>,
}

impl IntakeRequest {
    pub fn new(original_filename: impl Into<String>, source: JobSource) -> Self {
        Self {
            original_filename: original_filename.into(),
            source,
            stem_override: None,
            collection: None,
        }
    }

    pub fn with_stems(mut self, stems: Option<String>) -> Self {
        self.stem_override = stems.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_collection(mut self, collection: Option<CollectionInfo>) -> Self {
        self.collection = collection;
        self
    }
}

/// Queue uploaded bytes as a new job.
pub async fn enqueue_upload(ctx: &PipelineContext, req: IntakeRequest, data: Vec<u8>) -> Result<Job> {
    admit(ctx, req, move |dest| {
        write_atomic(dest, |file| file.write_all(&data))
    })
    .await
}

/// Queue a copy of `source` as a new job. The source file is left in place.
pub async fn enqueue_file(ctx: &PipelineContext, req: IntakeRequest, source: &Path) -> Result<Job> {
    let source = source.to_path_buf();
    admit(ctx, req, move |dest| {
        write_atomic(dest, |file| {
            let mut input = std::fs::File::open(&source)?;
            std::io::copy(&mut input, file).map(|_| ())
        })
    })
    .await
}

/// Validate, place the file in the queue, then record the job.
async fn admit<F>(ctx: &PipelineContext, req: IntakeRequest, place: F) -> Result<Job>
where
    F: FnOnce(&Path) -> std::io::Result<()> + Send + 'static,
{
    if !is_allowed_filename(&req.original_filename) {
        return Err(Error::invalid_input("File type not allowed"));
    }
    let settings = ctx.state.settings().snapshot(req.stem_override.as_deref())?;

    let id = JobId::new();
    let filename = queued_filename(&req.original_filename, id, Utc::now());
    let dest = ctx.layout.queue_file(&filename);

    let write_dest = dest.clone();
    tokio::task::spawn_blocking(move || place(&write_dest))
        .await
        .map_err(|e| Error::internal(format!("Intake task failed: {}", e)))?
        .map_err(|e| Error::io(format!("Failed to write {} to queue: {}", filename, e)))?;

    let new = NewJob {
        id,
        filename: filename.clone(),
        original_filename: req.original_filename.clone(),
        source: req.source,
        settings,
        collection: req.collection,
    };
    let created = get_conn(&ctx.db).and_then(|conn| jobs::create_job(&conn, &new));
    let job = match created {
        Ok(job) => job,
        Err(e) => {
            if let Err(rm) = std::fs::remove_file(&dest) {
                tracing::warn!("Failed to remove orphaned queue file {:?}: {}", dest, rm);
            }
            return Err(e);
        }
    };

    if let Err(e) = write_json_atomic(&ctx.layout.jobstate_file(&job.filename), &JobState::from(&job)) {
        tracing::warn!("Failed to write job state for {}: {}", job.filename, e);
    }

    tracing::info!(
        "Queued job {} for {} ({}, stems: {})",
        job.id,
        job.original_filename,
        job.source,
        job.settings.stem_types
    );
    ctx.state.broadcast(AppEvent::job_queued(
        job.id,
        job.filename.clone(),
        job.source.to_string(),
    ));
    ctx.state.queues().wake(Stage::Metadata);

    Ok(job)
}

/// `<base>_<YYYYmmddHHMMSS>_<id8><ext>` for a file named `original`.
pub fn queued_filename(original: &str, id: JobId, now: DateTime<Utc>) -> String {
    let path = Path::new(original);
    let base = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| sanitize_component(s, "upload"))
        .unwrap_or_else(|| "upload".to_string());
    format!(
        "{}_{}_{}{}",
        base,
        now.format("%Y%m%d%H%M%S"),
        id.short(),
        dotted_extension(path)
    )
}

/// Write `dest` through a temp file in the same directory.
fn write_atomic<F>(dest: &Path, fill: F) -> std::io::Result<()>
where
    F: FnOnce(&mut std::fs::File) -> std::io::Result<()>,
{
    let dir: PathBuf = dest
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::Builder::new().prefix(".incoming-").tempfile_in(&dir)?;
    fill(tmp.as_file_mut())?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_queued_filename_format() {
        let id: JobId = "0a1b2c3d-0000-4000-8000-000000000000".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            queued_filename("My Song.MP3", id, now),
            "My Song_20240309140507_0a1b2c3d.mp3"
        );
        assert_eq!(
            queued_filename("a:b?.flac", id, now),
            "a_b__20240309140507_0a1b2c3d.flac"
        );
    }

    #[test]
    fn test_write_atomic_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("q").join("song.mp3");
        write_atomic(&dest, |f| f.write_all(b"abc")).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"abc");
        assert_eq!(std::fs::read_dir(dest.parent().unwrap()).unwrap().count(), 1);

        let failed = write_atomic(&dir.path().join("q").join("other.mp3"), |_| {
            Err(std::io::Error::other("boom"))
        });
        assert!(failed.is_err());
        assert_eq!(std::fs::read_dir(dest.parent().unwrap()).unwrap().count(), 1);
    }
}
