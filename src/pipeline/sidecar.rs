//! JSON files written next to pipeline artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use stemforged_common::{JobId, JobStatus};
use stemforged_db::models::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverArtSource {
    Embedded,
    Fetched,
}

/// Metadata extracted for a job, read back by packaging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub job_id: JobId,
    pub artist: String,
    pub album: String,
    pub title: String,
    pub track_number: Option<u32>,
    pub year: Option<u32>,
    pub duration_secs: Option<f64>,
    pub bitrate_kbps: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub cover_art_path: Option<PathBuf>,
    pub cover_art_source: Option<CoverArtSource>,
}

/// Serialize `value` to `path` through a temp file in the same directory.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n")?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub fn read_record(path: &Path) -> std::io::Result<MetadataRecord> {
    let data = std::fs::read(path)?;
    serde_json::from_slice(&data).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// `queue/<filename>.jobstate.json` contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: JobId,
    pub original_filename: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobState {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            original_filename: job.original_filename.clone(),
            status: job.status,
            error: job.error.clone(),
            updated_at: job.updated_at,
        }
    }
}
