//! Cutting long inputs into fixed-length chunks and joining them back.

use crate::tools::run;
use crate::{Error, Result};
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
}

#[derive(Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Duration of an audio file in milliseconds, as reported by ffprobe.
pub fn probe_duration_ms(ffprobe: &Path, input: &Path) -> Result<u64> {
    let mut cmd = Command::new(ffprobe);
    cmd.args(["-v", "error", "-show_entries", "format=duration", "-of", "json"])
        .arg(input);
    let output = run(cmd, "ffprobe")?;

    let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
    let secs: f64 = parsed
        .format
        .duration
        .as_deref()
        .ok_or_else(|| Error::parse_error("ffprobe", "missing format.duration"))?
        .parse()
        .map_err(|e| Error::parse_error("ffprobe", format!("bad duration: {}", e)))?;

    Ok((secs * 1000.0).round().max(0.0) as u64)
}

/// Number of chunks `duration_ms` splits into at `chunk_ms` per chunk.
pub fn chunk_count(duration_ms: u64, chunk_ms: u64) -> u64 {
    if chunk_ms == 0 {
        return 1;
    }
    duration_ms.div_ceil(chunk_ms).max(1)
}

/// Cut `input` into WAV chunks of `chunk_ms` inside `out_dir`.
///
/// Returns chunk paths in playback order.
pub fn split_chunks(ffmpeg: &Path, input: &Path, chunk_ms: u64, out_dir: &Path) -> Result<Vec<PathBuf>> {
    if chunk_ms == 0 {
        return Err(Error::InvalidInput("chunk length must be positive".into()));
    }
    std::fs::create_dir_all(out_dir)?;

    let mut cmd = Command::new(ffmpeg);
    cmd.args(["-y", "-v", "error", "-i"])
        .arg(input)
        .args(["-vn", "-f", "segment"])
        .args(["-segment_time", &format!("{:.3}", chunk_ms as f64 / 1000.0)])
        .args(["-reset_timestamps", "1", "-c:a", "pcm_s16le"])
        .arg(out_dir.join("chunk_%04d.wav"));
    run(cmd, "ffmpeg")?;

    let mut chunks: Vec<PathBuf> = std::fs::read_dir(out_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("chunk_") && n.ends_with(".wav"))
                .unwrap_or(false)
        })
        .collect();
    chunks.sort();

    if chunks.is_empty() {
        return Err(Error::tool_failed("ffmpeg", "segmenting produced no chunks"));
    }
    Ok(chunks)
}

/// Join `inputs` end to end into `output` with the concat demuxer.
pub fn concat_audio(ffmpeg: &Path, inputs: &[PathBuf], output: &Path) -> Result<()> {
    if inputs.is_empty() {
        return Err(Error::InvalidInput("nothing to concatenate".into()));
    }
    let list_path = output.with_extension("concat.txt");
    {
        let mut list = std::fs::File::create(&list_path)?;
        for input in inputs {
            writeln!(list, "{}", concat_entry(input))?;
        }
    }

    let mut cmd = Command::new(ffmpeg);
    cmd.args(["-y", "-v", "error", "-f", "concat", "-safe", "0", "-i"])
        .arg(&list_path)
        .args(["-c", "copy"])
        .arg(output);
    let result = run(cmd, "ffmpeg");
    let _ = std::fs::remove_file(&list_path);
    result.map(|_| ())
}

/// A concat demuxer `file` line with single quotes escaped.
fn concat_entry(path: &Path) -> String {
    let escaped = path.to_string_lossy().replace('\'', r"'\''");
    format!("file '{}'", escaped)
}
