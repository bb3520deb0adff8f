//! Mixing stems into a single track with ffmpeg.

use crate::tools::run;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Output codec for a container extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCodec {
    Mp3,
    Flac,
    Wav,
    Vorbis,
    Aac,
}

impl OutputCodec {
    /// Codec for a file extension (without the dot, any case).
    pub fn for_extension(ext: &str) -> Result<Self> {
        match ext.to_lowercase().as_str() {
            "mp3" => Ok(Self::Mp3),
            "flac" => Ok(Self::Flac),
            "wav" => Ok(Self::Wav),
            "ogg" => Ok(Self::Vorbis),
            "m4a" => Ok(Self::Aac),
            other => Err(Error::Unsupported(format!("output format '{}'", other))),
        }
    }

    /// Get the ffmpeg encoder name.
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            Self::Mp3 => "libmp3lame",
            Self::Flac => "flac",
            Self::Wav => "pcm_s16le",
            Self::Vorbis => "libvorbis",
            Self::Aac => "aac",
        }
    }

    /// Lossless codecs ignore the bitrate setting.
    pub fn uses_bitrate(&self) -> bool {
        matches!(self, Self::Mp3 | Self::Vorbis | Self::Aac)
    }
}

/// Build the ffmpeg invocation that mixes `stems` into `output`.
pub fn mix_command(ffmpeg: &Path, stems: &[PathBuf], output: &Path, bitrate: &str) -> Result<Command> {
    if stems.is_empty() {
        return Err(Error::InvalidInput("no stems to mix".into()));
    }
    let ext = output
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| Error::InvalidInput(format!("output has no extension: {:?}", output)))?;
    let codec = OutputCodec::for_extension(ext)?;

    let mut cmd = Command::new(ffmpeg);
    cmd.args(["-y", "-v", "error"]);
    for stem in stems {
        cmd.arg("-i").arg(stem);
    }
    if stems.len() > 1 {
        cmd.args([
            "-filter_complex",
            &format!("amix=inputs={}:duration=longest:normalize=0", stems.len()),
        ]);
    }
    cmd.args(["-vn", "-map_metadata", "-1", "-c:a", codec.ffmpeg_name()]);
    if codec.uses_bitrate() && !bitrate.is_empty() {
        cmd.args(["-b:a", bitrate]);
    }
    cmd.arg(output);
    Ok(cmd)
}

/// Overlay `stems` into one track at `output`. The codec follows the output
/// extension.
pub fn mix_stems(ffmpeg: &Path, stems: &[PathBuf], output: &Path, bitrate: &str) -> Result<()> {
    #[cfg(feature = "tracing")]
    tracing::debug!(stems = stems.len(), output = %output.display(), "Mixing stems");

    for stem in stems {
        if !stem.exists() {
            return Err(Error::file_not_found(stem));
        }
    }
    run(mix_command(ffmpeg, stems, output, bitrate)?, "ffmpeg")?;
    Ok(())
}
