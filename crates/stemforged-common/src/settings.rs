//! Pipeline settings.
//!
//! The same struct is used for the `[pipeline]` config section, the admin
//! settings API, and the per-job snapshot stored in the ledger at intake.

use crate::error::{Error, Result};
use crate::types::{SplitterType, StemCount};
use serde::{Deserialize, Serialize};

/// Shortest chunk the separator may be asked to process.
pub const MIN_CHUNK_FLOOR_MS: u64 = 1_000;

/// Settings controlling how a job is separated and packaged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default)]
    pub splitter_type: SplitterType,

    #[serde(default)]
    pub stems: StemCount,

    /// Comma-separated stems retained in the final mix.
    #[serde(default = "default_stem_types")]
    pub stem_types: String,

    /// Drop `vocals` from the selection when a job is snapshotted.
    #[serde(default = "default_true")]
    pub default_remove_vocals: bool,

    #[serde(default)]
    pub chunking_enabled: bool,

    #[serde(default = "default_chunk_length_ms")]
    pub chunk_length_ms: u64,

    /// Defaults to half of `chunk_length_ms` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_chunk_length_ms: Option<u64>,

    #[serde(default = "default_chunk_max_attempts")]
    pub chunk_max_attempts: u32,

    /// Delete stems, sidecar and queue copy after packaging.
    #[serde(default = "default_true")]
    pub cleanup_intermediate: bool,

    /// Total attempts per stage for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    #[serde(default = "default_true")]
    pub fetch_cover_art: bool,

    #[serde(default = "default_output_bitrate")]
    pub output_bitrate: String,
}

fn default_stem_types() -> String {
    "vocals,drums,bass,other".to_string()
}

fn default_true() -> bool {
    true
}

fn default_chunk_length_ms() -> u64 {
    240_000
}

fn default_chunk_max_attempts() -> u32 {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    10
}

fn default_output_bitrate() -> String {
    "320k".to_string()
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            splitter_type: SplitterType::default(),
            stems: StemCount::default(),
            stem_types: default_stem_types(),
            default_remove_vocals: true,
            chunking_enabled: false,
            chunk_length_ms: default_chunk_length_ms(),
            min_chunk_length_ms: None,
            chunk_max_attempts: default_chunk_max_attempts(),
            cleanup_intermediate: true,
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            fetch_cover_art: true,
            output_bitrate: default_output_bitrate(),
        }
    }
}

/// Split a comma-separated stem list, trimming and dropping empties.
pub fn parse_stem_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl PipelineSettings {
    pub fn effective_min_chunk_length_ms(&self) -> u64 {
        self.min_chunk_length_ms
            .unwrap_or(self.chunk_length_ms / 2)
            .max(MIN_CHUNK_FLOOR_MS)
    }

    /// Stems named by `stem_types`.
    pub fn selected_stems(&self) -> Vec<String> {
        parse_stem_list(&self.stem_types)
    }

    /// Check that `selection` is a non-empty subset of the active model's stems.
    pub fn validate_selection(&self, selection: &[String]) -> Result<()> {
        if selection.is_empty() {
            return Err(Error::validation("No stems selected"));
        }
        for stem in selection {
            if !self.stems.supports(stem) {
                return Err(Error::validation(format!(
                    "Stem '{}' is not produced by the {}-stem model (available: {})",
                    stem,
                    self.stems,
                    self.stems.stems().join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Validate settings as a whole. Used by the settings API before applying.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_length_ms < MIN_CHUNK_FLOOR_MS {
            return Err(Error::validation(format!(
                "chunk_length_ms must be at least {}",
                MIN_CHUNK_FLOOR_MS
            )));
        }
        if let Some(min) = self.min_chunk_length_ms {
            if min > self.chunk_length_ms {
                return Err(Error::validation(
                    "min_chunk_length_ms cannot exceed chunk_length_ms",
                ));
            }
        }
        if self.chunk_max_attempts == 0 {
            return Err(Error::validation("chunk_max_attempts must be at least 1"));
        }
        if self.max_retries == 0 {
            return Err(Error::validation("max_retries must be at least 1"));
        }
        self.validate_selection(&self.selected_stems())
    }

    /// Build the snapshot stored with a new job.
    ///
    /// `override_stems` replaces the default selection. `vocals` is removed from
    /// the default selection when `default_remove_vocals` is set; an explicit
    /// override is taken as-is. The resulting selection is validated against
    /// the stem count.
    pub fn snapshot(&self, override_stems: Option<&str>) -> Result<PipelineSettings> {
        let selection = match override_stems.map(parse_stem_list) {
            Some(list) if !list.is_empty() => list,
            _ => {
                let mut list = self.selected_stems();
                if self.default_remove_vocals {
                    list.retain(|s| s != "vocals");
                }
                list
            }
        };
        self.validate_selection(&selection)?;

        let mut snapshot = self.clone();
        snapshot.stem_types = selection.join(",");
        Ok(snapshot)
    }

    /// Apply a partial update, returning the validated result.
    pub fn merged(&self, update: &SettingsUpdate) -> Result<PipelineSettings> {
        let mut next = self.clone();
        if let Some(ref splitter) = update.splitter_type {
            next.splitter_type = splitter.parse().map_err(Error::validation)?;
        }
        if let Some(stems) = update.stems {
            next.stems = u8::try_from(stems)
                .map_err(|_| "Invalid stems value, must be 2, 4, or 5".to_string())
                .and_then(StemCount::try_from)
                .map_err(Error::validation)?;
        }
        if let Some(ref types) = update.stem_types {
            next.stem_types = parse_stem_list(types).join(",");
        }
        if let Some(v) = update.default_remove_vocals {
            next.default_remove_vocals = v;
        }
        if let Some(v) = update.chunking_enabled {
            next.chunking_enabled = v;
        }
        if let Some(v) = update.chunk_length_ms {
            next.chunk_length_ms = v;
        }
        if let Some(v) = update.min_chunk_length_ms {
            next.min_chunk_length_ms = Some(v);
        }
        if let Some(v) = update.chunk_max_attempts {
            next.chunk_max_attempts = v;
        }
        if let Some(v) = update.cleanup_intermediate {
            next.cleanup_intermediate = v;
        }
        if let Some(v) = update.max_retries {
            next.max_retries = v;
        }
        if let Some(v) = update.retry_delay_secs {
            next.retry_delay_secs = v;
        }
        if let Some(v) = update.fetch_cover_art {
            next.fetch_cover_art = v;
        }
        if let Some(ref v) = update.output_bitrate {
            next.output_bitrate = v.clone();
        }
        next.validate()?;
        Ok(next)
    }
}

/// Partial settings update accepted by the admin API.
///
/// Raw types are used for `splitter_type` and `stems` so invalid values produce
/// the API's validation messages instead of a deserialization error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub splitter_type: Option<String>,
    pub stems: Option<i64>,
    pub stem_types: Option<String>,
    pub default_remove_vocals: Option<bool>,
    pub chunking_enabled: Option<bool>,
    pub chunk_length_ms: Option<u64>,
    pub min_chunk_length_ms: Option<u64>,
    pub chunk_max_attempts: Option<u32>,
    pub cleanup_intermediate: Option<bool>,
    pub max_retries: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub fetch_cover_art: Option<bool>,
    pub output_bitrate: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = PipelineSettings::default();
        assert_eq!(s.splitter_type, SplitterType::Spleeter);
        assert_eq!(s.stems, StemCount::FOUR);
        assert_eq!(s.effective_min_chunk_length_ms(), 120_000);
        assert_eq!(s.max_retries, 3);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let s: PipelineSettings = serde_json::from_str(r#"{"stems": 5}"#).unwrap();
        assert_eq!(s.stems, StemCount::FIVE);
        assert_eq!(s.stem_types, "vocals,drums,bass,other");
        assert!(serde_json::from_str::<PipelineSettings>(r#"{"stems": 3}"#).is_err());
    }

    #[test]
    fn test_snapshot_removes_vocals_by_default() {
        let snap = PipelineSettings::default().snapshot(None).unwrap();
        assert_eq!(snap.stem_types, "drums,bass,other");
    }

    #[test]
    fn test_snapshot_override() {
        let s = PipelineSettings::default();
        let snap = s.snapshot(Some(" Vocals , bass")).unwrap();
        assert_eq!(snap.stem_types, "vocals,bass");

        let err = s.snapshot(Some("piano")).unwrap_err();
        assert!(err.to_string().contains("piano"));
    }

    #[test]
    fn test_snapshot_rejects_invalid_default() {
        let s = PipelineSettings {
            stems: StemCount::TWO,
            ..Default::default()
        };
        // drums/bass/other do not exist in the 2-stem model
        assert!(s.snapshot(None).is_err());
    }

    #[test]
    fn test_merged_validation_messages() {
        let s = PipelineSettings::default();
        let bad_splitter = SettingsUpdate {
            splitter_type: Some("openunmix".into()),
            ..Default::default()
        };
        assert_eq!(
            s.merged(&bad_splitter).unwrap_err().to_string(),
            "Invalid splitter_type"
        );

        let bad_stems = SettingsUpdate {
            stems: Some(3),
            ..Default::default()
        };
        assert_eq!(
            s.merged(&bad_stems).unwrap_err().to_string(),
            "Invalid stems value, must be 2, 4, or 5"
        );
    }

    #[test]
    fn test_merged_switch_to_two_stems() {
        let s = PipelineSettings::default();
        let update = SettingsUpdate {
            stems: Some(2),
            stem_types: Some("vocals,accompaniment".into()),
            splitter_type: Some("demucs".into()),
            ..Default::default()
        };
        let next = s.merged(&update).unwrap();
        assert_eq!(next.stems, StemCount::TWO);
        assert_eq!(next.splitter_type, SplitterType::Demucs);
        assert_eq!(next.snapshot(None).unwrap().stem_types, "accompaniment");
    }

    #[test]
    fn test_chunk_validation() {
        let s = PipelineSettings {
            chunk_length_ms: 10_000,
            min_chunk_length_ms: Some(20_000),
            ..Default::default()
        };
        assert!(s.validate().is_err());
    }
}
