//! Metadata stage: `waiting` → `metadata_extracted`.

use super::sidecar::{write_json_atomic, CoverArtSource, MetadataRecord};
use super::{PipelineContext, StageError, StageHandler, StageOutcome};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use stemforged_av::{read_tags, CoverArt, TagReport};
use stemforged_common::{CollectionInfo, CollectionKind, Stage};
use stemforged_db::models::Job;

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

pub struct MetadataStage {
    ctx: Arc<PipelineContext>,
}

impl MetadataStage {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    async fn read_report(&self, input: &Path) -> Result<TagReport, StageError> {
        let path = input.to_path_buf();
        let result = tokio::task::spawn_blocking(move || read_tags(&path)).await?;
        result.map_err(|e| match e {
            stemforged_av::Error::FileNotFound { .. } => {
                StageError::Validation(format!("Queued file is missing: {}", e))
            }
            stemforged_av::Error::Tag(msg) => {
                StageError::Validation(format!("Unreadable audio file: {}", msg))
            }
            other => StageError::from(other),
        })
    }

    /// Download a front cover when the job allows it. Failures are logged only.
    async fn fetch_cover(&self, job: &Job, record: &MetadataRecord) -> Option<CoverArt> {
        let client = self.ctx.cover_art.as_ref()?;
        if !job.settings.fetch_cover_art {
            return None;
        }
        if record.artist == UNKNOWN_ARTIST || record.album == UNKNOWN_ALBUM {
            tracing::debug!("Skipping cover lookup for job {}: artist or album unknown", job.id);
            return None;
        }

        match client
            .fetch_front_cover(&record.artist, &record.album, Some(&record.title))
            .await
        {
            Ok(Some(data)) => Some(CoverArt::from_bytes(data)),
            Ok(None) => {
                tracing::info!("No cover art found for {} - {}", record.artist, record.album);
                None
            }
            Err(e) => {
                tracing::warn!("Cover art lookup failed for job {}: {:#}", job.id, e);
                None
            }
        }
    }
}

#[async_trait]
impl StageHandler for MetadataStage {
    fn stage(&self) -> Stage {
        Stage::Metadata
    }

    async fn process(&self, job: &Job) -> Result<StageOutcome, StageError> {
        let layout = &self.ctx.layout;
        let report = self.read_report(&layout.queue_file(&job.filename)).await?;

        let mut record = build_record(job, &report);
        let mut cover = report.cover.clone().map(|c| (c, CoverArtSource::Embedded));
        if cover.is_none() {
            cover = self
                .fetch_cover(job, &record)
                .await
                .map(|c| (c, CoverArtSource::Fetched));
        }

        let cover = cover.map(|(art, source)| {
            let path = layout.cover_file(job.id, art.extension);
            record.cover_art_path = Some(path.clone());
            record.cover_art_source = Some(source);
            (path, art.data)
        });

        let sidecar = layout.sidecar(job.id);
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            if let Some((path, data)) = cover {
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                std::fs::write(&path, &data)?;
            }
            write_json_atomic(&sidecar, &record)
        })
        .await??;

        tracing::info!(
            "Extracted metadata for job {} ({})",
            job.id,
            job.original_filename
        );
        Ok(StageOutcome::default())
    }
}

/// Sidecar contents for `job`, filling gaps from the collection and file name.
pub fn build_record(job: &Job, report: &TagReport) -> MetadataRecord {
    let tags = &report.tags;
    let album_collection = job
        .collection
        .as_ref()
        .filter(|c| c.kind == CollectionKind::Album);

    let title = tags.title.clone().unwrap_or_else(|| {
        Path::new(&job.original_filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&job.original_filename)
            .to_string()
    });

    MetadataRecord {
        job_id: job.id,
        artist: tags
            .artist
            .clone()
            .unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
        album: tags
            .album
            .clone()
            .or_else(|| album_collection.map(|c| c.name.clone()))
            .unwrap_or_else(|| UNKNOWN_ALBUM.to_string()),
        title,
        track_number: tags
            .track_number
            .or_else(|| album_collection.and_then(|c: &CollectionInfo| c.track_number)),
        year: tags.year,
        duration_secs: Some(report.properties.duration_secs),
        bitrate_kbps: report.properties.bitrate_kbps,
        sample_rate: report.properties.sample_rate,
        channels: report.properties.channels,
        cover_art_path: None,
        cover_art_source: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stemforged_av::{AudioProperties, AudioTags};
    use stemforged_common::{JobId, JobSource, JobStatus, PipelineSettings};

    fn job(original: &str, collection: Option<CollectionInfo>) -> Job {
        Job {
            id: JobId::new(),
            filename: format!("q_{}", original),
            original_filename: original.to_string(),
            status: JobStatus::Waiting,
            source: JobSource::Watcher,
            settings: PipelineSettings::default(),
            collection,
            metadata_retries: 0,
            separation_retries: 0,
            packaging_retries: 0,
            error: None,
            last_error: None,
            output_path: None,
            claimed_by: None,
            claimed_at: None,
            not_before: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    fn report(tags: AudioTags) -> TagReport {
        TagReport {
            tags,
            properties: AudioProperties {
                duration_secs: 2.0,
                bitrate_kbps: Some(1411),
                sample_rate: Some(44100),
                channels: Some(2),
            },
            cover: None,
        }
    }

    #[test]
    fn test_missing_tags_fall_back() {
        let record = build_record(&job("01 - Intro.mp3", None), &report(AudioTags::default()));
        assert_eq!(record.artist, UNKNOWN_ARTIST);
        assert_eq!(record.album, UNKNOWN_ALBUM);
        assert_eq!(record.title, "01 - Intro");
        assert_eq!(record.sample_rate, Some(44100));
    }

    #[test]
    fn test_album_collection_fills_album_and_track() {
        let collection = CollectionInfo {
            kind: CollectionKind::Album,
            name: "Live Set".into(),
            track_number: Some(4),
        };
        let tags = AudioTags {
            artist: Some("A".into()),
            ..Default::default()
        };
        let record = build_record(&job("x.mp3", Some(collection)), &report(tags));
        assert_eq!(record.album, "Live Set");
        assert_eq!(record.track_number, Some(4));
    }

    #[test]
    fn test_playlist_does_not_set_album() {
        let collection = CollectionInfo {
            kind: CollectionKind::Playlist,
            name: "Road Trip".into(),
            track_number: None,
        };
        let record = build_record(&job("x.mp3", Some(collection)), &report(AudioTags::default()));
        assert_eq!(record.album, UNKNOWN_ALBUM);
    }

    #[test]
    fn test_tags_win_over_collection() {
        let collection = CollectionInfo {
            kind: CollectionKind::Album,
            name: "Folder Name".into(),
            track_number: Some(9),
        };
        let tags = AudioTags {
            artist: Some("A".into()),
            album: Some("B".into()),
            title: Some("C".into()),
            track_number: Some(2),
            year: Some(1999),
        };
        let record = build_record(&job("x.mp3", Some(collection)), &report(tags));
        assert_eq!((record.album.as_str(), record.title.as_str()), ("B", "C"));
        assert_eq!(record.track_number, Some(2));
        assert_eq!(record.year, Some(1999));
    }
}
