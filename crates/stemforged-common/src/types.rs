//! Core type definitions for jobs, pipeline stages, and stem models.
//!
//! All enums serialize in snake_case/lowercase, matching how they are stored in
//! the job ledger and returned by the API.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a job in the pipeline.
///
/// Statuses advance strictly in order; `Error` is reachable from any
/// non-terminal status and has no successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted at intake, waiting for metadata extraction.
    Waiting,
    /// Metadata sidecar written, waiting for separation.
    MetadataExtracted,
    /// Stems written, waiting for packaging.
    StemsSplit,
    /// Output placed in the output tree.
    Completed,
    /// Terminal failure.
    Error,
}

impl JobStatus {
    /// All statuses in pipeline order.
    pub const ALL: [JobStatus; 5] = [
        Self::Waiting,
        Self::MetadataExtracted,
        Self::StemsSplit,
        Self::Completed,
        Self::Error,
    ];

    /// The status a successful stage moves this job to.
    pub fn next(self) -> Option<JobStatus> {
        match self {
            Self::Waiting => Some(Self::MetadataExtracted),
            Self::MetadataExtracted => Some(Self::StemsSplit),
            Self::StemsSplit => Some(Self::Completed),
            Self::Completed | Self::Error => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::MetadataExtracted => "metadata_extracted",
            Self::StemsSplit => "stems_split",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Invalid job status: {}", s))
    }
}

/// A processing stage. Each stage owns exactly one input status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Metadata,
    Separation,
    Packaging,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Self::Metadata, Self::Separation, Self::Packaging];

    /// Status this stage claims jobs from.
    pub fn input_status(self) -> JobStatus {
        match self {
            Self::Metadata => JobStatus::Waiting,
            Self::Separation => JobStatus::MetadataExtracted,
            Self::Packaging => JobStatus::StemsSplit,
        }
    }

    /// Status this stage advances jobs to.
    pub fn output_status(self) -> JobStatus {
        match self {
            Self::Metadata => JobStatus::MetadataExtracted,
            Self::Separation => JobStatus::StemsSplit,
            Self::Packaging => JobStatus::Completed,
        }
    }

    /// The stage that owns a status, if any.
    pub fn for_status(status: JobStatus) -> Option<Stage> {
        Self::ALL.into_iter().find(|s| s.input_status() == status)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Separation => "separation",
            Self::Packaging => "packaging",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "metadata" => Ok(Self::Metadata),
            "separation" | "splitter" => Ok(Self::Separation),
            "packaging" | "packager" => Ok(Self::Packaging),
            _ => Err(format!("Invalid stage: {}", s)),
        }
    }
}

/// External source-separation tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SplitterType {
    #[default]
    Spleeter,
    Demucs,
}

impl SplitterType {
    pub fn binary(self) -> &'static str {
        match self {
            Self::Spleeter => "spleeter",
            Self::Demucs => "demucs",
        }
    }
}

impl fmt::Display for SplitterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

impl std::str::FromStr for SplitterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spleeter" => Ok(Self::Spleeter),
            "demucs" => Ok(Self::Demucs),
            _ => Err("Invalid splitter_type".to_string()),
        }
    }
}

/// Stem names produced by the 2-stem model.
pub const STEMS_2: &[&str] = &["vocals", "accompaniment"];
/// Stem names produced by the 4-stem model.
pub const STEMS_4: &[&str] = &["vocals", "drums", "bass", "other"];
/// Stem names produced by the 5-stem model.
pub const STEMS_5: &[&str] = &["vocals", "drums", "bass", "piano", "other"];

/// Number of stems the separation model produces. Only 2, 4 and 5 exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct StemCount(u8);

impl StemCount {
    pub const TWO: StemCount = StemCount(2);
    pub const FOUR: StemCount = StemCount(4);
    pub const FIVE: StemCount = StemCount(5);

    pub fn get(self) -> u8 {
        self.0
    }

    /// Stem names the model produces, in canonical order.
    pub fn stems(self) -> &'static [&'static str] {
        match self.0 {
            2 => STEMS_2,
            5 => STEMS_5,
            _ => STEMS_4,
        }
    }

    pub fn supports(self, stem: &str) -> bool {
        self.stems().contains(&stem)
    }
}

impl Default for StemCount {
    fn default() -> Self {
        Self::FOUR
    }
}

impl TryFrom<u8> for StemCount {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 | 4 | 5 => Ok(Self(value)),
            _ => Err("Invalid stems value, must be 2, 4, or 5".to_string()),
        }
    }
}

impl From<StemCount> for u8 {
    fn from(count: StemCount) -> Self {
        count.0
    }
}

impl fmt::Display for StemCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a job entered the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobSource {
    Upload,
    Watcher,
    Cli,
}

impl JobSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Watcher => "watcher",
            Self::Cli => "cli",
        }
    }
}

impl fmt::Display for JobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(Self::Upload),
            "watcher" => Ok(Self::Watcher),
            "cli" => Ok(Self::Cli),
            _ => Err(format!("Invalid job source: {}", s)),
        }
    }
}

/// Kind of collection a watched file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Album,
    Playlist,
}

/// Album or playlist context captured from a watched directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub kind: CollectionKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_number: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_order() {
        assert_eq!(JobStatus::Waiting.next(), Some(JobStatus::MetadataExtracted));
        assert_eq!(JobStatus::MetadataExtracted.next(), Some(JobStatus::StemsSplit));
        assert_eq!(JobStatus::StemsSplit.next(), Some(JobStatus::Completed));
        assert_eq!(JobStatus::Completed.next(), None);
        assert_eq!(JobStatus::Error.next(), None);
        assert!(JobStatus::Error.is_terminal());
        assert!(!JobStatus::StemsSplit.is_terminal());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&JobStatus::MetadataExtracted).unwrap();
        assert_eq!(json, r#""metadata_extracted""#);
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_stage_ownership() {
        for stage in Stage::ALL {
            assert_eq!(stage.input_status().next(), Some(stage.output_status()));
            assert_eq!(Stage::for_status(stage.input_status()), Some(stage));
        }
        assert_eq!(Stage::for_status(JobStatus::Completed), None);
        assert_eq!("splitter".parse::<Stage>().unwrap(), Stage::Separation);
    }

    #[test]
    fn test_stem_count() {
        assert!(StemCount::try_from(3).is_err());
        let five = StemCount::try_from(5).unwrap();
        assert!(five.supports("piano"));
        assert!(!StemCount::FOUR.supports("piano"));
        assert_eq!(StemCount::TWO.stems(), &["vocals", "accompaniment"]);

        let parsed: StemCount = serde_json::from_str("4").unwrap();
        assert_eq!(parsed, StemCount::FOUR);
        assert!(serde_json::from_str::<StemCount>("6").is_err());
    }

    #[test]
    fn test_splitter_parse() {
        assert_eq!("demucs".parse::<SplitterType>().unwrap(), SplitterType::Demucs);
        assert_eq!(
            "openunmix".parse::<SplitterType>().unwrap_err(),
            "Invalid splitter_type"
        );
    }

    #[test]
    fn test_collection_serialization() {
        let info = CollectionInfo {
            kind: CollectionKind::Album,
            name: "Greatest Hits".into(),
            track_number: Some(3),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["kind"], "album");
        assert_eq!(json["track_number"], 3);
    }
}
