//! Source separation backends.

use super::StageError;
use crate::config::ToolsConfig;
use std::path::{Path, PathBuf};
use stemforged_av::chunk::{chunk_count, concat_audio, probe_duration_ms, split_chunks};
use stemforged_av::workspace::move_file;
use stemforged_av::{get_tool_path, SeparatorTool};
use stemforged_common::PipelineSettings;

/// Splits an audio file into stems.
///
/// Called from a blocking thread. On success `dest_dir` holds exactly one
/// file per stem of the configured model, and the returned pairs name them.
pub trait Separator: Send + Sync {
    fn separate(
        &self,
        input: &Path,
        dest_dir: &Path,
        settings: &PipelineSettings,
    ) -> Result<Vec<(String, PathBuf)>, StageError>;
}

/// Runs spleeter or demucs, optionally chunking long inputs with ffmpeg.
pub struct ToolSeparator {
    tools: ToolsConfig,
}

impl ToolSeparator {
    pub fn new(tools: ToolsConfig) -> Self {
        Self { tools }
    }

    fn tool(&self, settings: &PipelineSettings) -> Result<SeparatorTool, StageError> {
        let tool = SeparatorTool::new(settings.splitter_type, settings.stems);
        let configured = match settings.splitter_type {
            stemforged_common::SplitterType::Spleeter => self.tools.spleeter_path.as_deref(),
            stemforged_common::SplitterType::Demucs => self.tools.demucs_path.as_deref(),
        };
        let binary = get_tool_path(settings.splitter_type.binary(), configured)?;
        Ok(tool.with_binary(binary))
    }

    fn separate_chunked(
        &self,
        tool: &SeparatorTool,
        input: &Path,
        dest_dir: &Path,
        settings: &PipelineSettings,
    ) -> Result<Vec<(String, PathBuf)>, StageError> {
        let ffmpeg = get_tool_path("ffmpeg", self.tools.ffmpeg_path.as_deref())?;
        let ffprobe = get_tool_path("ffprobe", self.tools.ffprobe_path.as_deref())?;

        let duration_ms = probe_duration_ms(&ffprobe, input)?;
        if chunk_count(duration_ms, settings.chunk_length_ms) <= 1 {
            return Ok(tool.separate(input, dest_dir)?);
        }

        retry_chunked(settings, |chunk_ms| {
            tracing::info!(
                "Separating in {} ms chunks ({} chunks)",
                chunk_ms,
                chunk_count(duration_ms, chunk_ms)
            );
            separate_in_chunks(tool, &ffmpeg, input, dest_dir, chunk_ms)
        })
    }
}

impl Separator for ToolSeparator {
    fn separate(
        &self,
        input: &Path,
        dest_dir: &Path,
        settings: &PipelineSettings,
    ) -> Result<Vec<(String, PathBuf)>, StageError> {
        let tool = self.tool(settings)?;
        if settings.chunking_enabled {
            self.separate_chunked(&tool, input, dest_dir, settings)
        } else {
            Ok(tool.separate(input, dest_dir)?)
        }
    }
}

/// Chunk length used by each chunking attempt: the configured length, then
/// halved after every failure down to the minimum.
pub fn chunk_attempt_lengths(settings: &PipelineSettings) -> Vec<u64> {
    let min = settings.effective_min_chunk_length_ms();
    let mut len = settings.chunk_length_ms.max(min);
    (0..settings.chunk_max_attempts.max(1))
        .map(|_| {
            let current = len;
            len = (len / 2).max(min);
            current
        })
        .collect()
}

/// Run `attempt` once per length from [`chunk_attempt_lengths`] until one
/// succeeds. A configuration error ends the loop at once; running out of
/// attempts is transient.
pub fn retry_chunked<T>(
    settings: &PipelineSettings,
    mut attempt: impl FnMut(u64) -> Result<T, StageError>,
) -> Result<T, StageError> {
    let lengths = chunk_attempt_lengths(settings);
    let mut last_error = None;
    for (i, chunk_ms) in lengths.iter().copied().enumerate() {
        match attempt(chunk_ms) {
            Ok(value) => return Ok(value),
            Err(e @ StageError::Configuration(_)) => return Err(e),
            Err(e) => {
                tracing::warn!("Chunk attempt {} ({} ms) failed: {}", i + 1, chunk_ms, e);
                last_error = Some(e);
            }
        }
    }

    Err(StageError::Transient(format!(
        "Chunked separation failed after {} attempts: {}",
        lengths.len(),
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// Cut, separate each chunk, and join the per-stem results into `dest_dir`.
fn separate_in_chunks(
    tool: &SeparatorTool,
    ffmpeg: &Path,
    input: &Path,
    dest_dir: &Path,
    chunk_ms: u64,
) -> Result<Vec<(String, PathBuf)>, StageError> {
    let parent = dest_dir
        .parent()
        .ok_or_else(|| StageError::Transient("stems directory has no parent".into()))?;
    std::fs::create_dir_all(parent)?;
    let work = tempfile::Builder::new()
        .prefix(".chunks-")
        .tempdir_in(parent)?;

    let chunks = split_chunks(ffmpeg, input, chunk_ms, &work.path().join("chunks"))?;

    let mut per_chunk = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        let out = work.path().join(format!("sep_{:04}", i));
        per_chunk.push(tool.separate(chunk, &out)?);
    }

    let joined_dir = work.path().join("joined");
    std::fs::create_dir_all(&joined_dir)?;
    let mut joined = Vec::new();
    for stem in tool.stems.stems() {
        let parts: Vec<PathBuf> = per_chunk
            .iter()
            .map(|stems| {
                stems
                    .iter()
                    .find(|(name, _)| name == stem)
                    .map(|(_, path)| path.clone())
                    .ok_or_else(|| StageError::Transient(format!("chunk is missing stem '{}'", stem)))
            })
            .collect::<Result<_, _>>()?;
        let out = joined_dir.join(format!("{}.wav", stem));
        concat_audio(ffmpeg, &parts, &out)?;
        joined.push((stem.to_string(), out));
    }

    if dest_dir.exists() {
        std::fs::remove_dir_all(dest_dir)?;
    }
    std::fs::create_dir_all(dest_dir)?;
    let mut placed = Vec::with_capacity(joined.len());
    for (stem, src) in joined {
        let dest = dest_dir.join(format!("{}.wav", stem));
        move_file(&src, &dest)?;
        placed.push((stem, dest));
    }
    Ok(placed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_lengths_halve_to_minimum() {
        let settings = PipelineSettings {
            chunk_length_ms: 240_000,
            min_chunk_length_ms: Some(50_000),
            chunk_max_attempts: 4,
            ..Default::default()
        };
        assert_eq!(
            chunk_attempt_lengths(&settings),
            vec![240_000, 120_000, 60_000, 50_000]
        );
    }

    #[test]
    fn test_chunk_lengths_default_minimum() {
        let settings = PipelineSettings {
            chunk_length_ms: 10_000,
            chunk_max_attempts: 3,
            ..Default::default()
        };
        // minimum defaults to half the chunk length
        assert_eq!(chunk_attempt_lengths(&settings), vec![10_000, 5_000, 5_000]);
    }

    fn chunk_settings() -> PipelineSettings {
        PipelineSettings {
            chunking_enabled: true,
            chunk_length_ms: 240_000,
            min_chunk_length_ms: Some(30_000),
            chunk_max_attempts: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_chunk_retry_halves_until_success() {
        let mut tried = Vec::new();
        let result = retry_chunked(&chunk_settings(), |chunk_ms| {
            tried.push(chunk_ms);
            if tried.len() < 3 {
                Err(StageError::Transient("spleeter ran out of memory".into()))
            } else {
                Ok(chunk_ms)
            }
        });

        assert_eq!(result, Ok(60_000));
        assert_eq!(tried, vec![240_000, 120_000, 60_000]);
    }

    #[test]
    fn test_chunk_retry_exhaustion_is_transient() {
        let mut calls = 0;
        let result: Result<(), _> = retry_chunked(&chunk_settings(), |_| {
            calls += 1;
            Err(StageError::Transient("exit status 1".into()))
        });

        assert_eq!(calls, 4);
        match result {
            Err(StageError::Transient(msg)) => {
                assert!(msg.contains("after 4 attempts"), "{}", msg);
                assert!(msg.contains("exit status 1"), "{}", msg);
            }
            other => panic!("expected transient error, got {:?}", other),
        }
    }

    #[test]
    fn test_chunk_retry_stops_on_configuration_error() {
        let mut calls = 0;
        let result: Result<(), _> = retry_chunked(&chunk_settings(), |_| {
            calls += 1;
            Err(StageError::Configuration("ffmpeg not found".into()))
        });

        assert_eq!(calls, 1);
        assert_eq!(result, Err(StageError::Configuration("ffmpeg not found".into())));
    }

    #[test]
    fn test_missing_separator_binary_is_configuration_error() {
        let tools = ToolsConfig {
            spleeter_path: Some(PathBuf::from("/nonexistent/spleeter")),
            ..Default::default()
        };
        let separator = ToolSeparator::new(tools);
        let settings = PipelineSettings::default();
        // Only meaningful where spleeter is not installed on PATH.
        if stemforged_av::require_tool("spleeter").is_err() {
            let dir = tempfile::tempdir().unwrap();
            let input = dir.path().join("in.wav");
            std::fs::write(&input, b"x").unwrap();
            let err = separator
                .separate(&input, &dir.path().join("stems"), &settings)
                .unwrap_err();
            assert!(matches!(err, StageError::Configuration(_)));
        }
    }
}
