//! Stem mixing backends.

use super::StageError;
use crate::config::ToolsConfig;
use std::path::{Path, PathBuf};
use stemforged_av::{get_tool_path, mix_stems};

/// Overlays stems into a single track. Called from a blocking thread.
pub trait StemMixer: Send + Sync {
    fn mix(&self, stems: &[PathBuf], output: &Path, bitrate: &str) -> Result<(), StageError>;
}

pub struct FfmpegMixer {
    tools: ToolsConfig,
}

impl FfmpegMixer {
    pub fn new(tools: ToolsConfig) -> Self {
        Self { tools }
    }
}

impl StemMixer for FfmpegMixer {
    fn mix(&self, stems: &[PathBuf], output: &Path, bitrate: &str) -> Result<(), StageError> {
        let ffmpeg = get_tool_path("ffmpeg", self.tools.ffmpeg_path.as_deref())?;
        mix_stems(&ffmpeg, stems, output, bitrate)?;
        Ok(())
    }
}
