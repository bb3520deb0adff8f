//! Source separation via spleeter or demucs.
//!
//! Both tools write stems into a nested output tree whose layout depends on
//! the tool and model. The tree is searched for one file per expected stem,
//! and those files are moved into a flat destination directory as
//! `<stem>.<ext>`.

use crate::tools::run;
use crate::workspace::move_file;
use crate::{Error, Result, Workspace};
use std::path::{Path, PathBuf};
use std::process::Command;
use stemforged_common::{SplitterType, StemCount};
use walkdir::WalkDir;

/// File extensions a separation tool may write stems in.
const STEM_EXTENSIONS: &[&str] = &["wav", "mp3", "flac"];

/// Separation tool configuration.
#[derive(Debug, Clone)]
pub struct SeparatorTool {
    pub splitter: SplitterType,
    pub stems: StemCount,
    /// Executable to run. Defaults to the splitter's binary name on PATH.
    pub binary: PathBuf,
}

impl SeparatorTool {
    pub fn new(splitter: SplitterType, stems: StemCount) -> Self {
        Self {
            splitter,
            stems,
            binary: PathBuf::from(splitter.binary()),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Build the tool invocation writing into `out_dir`.
    pub fn command(&self, input: &Path, out_dir: &Path) -> Result<Command> {
        let mut cmd = Command::new(&self.binary);
        match self.splitter {
            SplitterType::Spleeter => {
                cmd.arg("separate")
                    .args(["-p", &format!("spleeter:{}stems", self.stems)])
                    .arg("-o")
                    .arg(out_dir)
                    .arg(input);
            }
            SplitterType::Demucs => {
                cmd.arg("-o").arg(out_dir);
                match self.stems.get() {
                    2 => {
                        cmd.arg("--two-stems=vocals");
                    }
                    4 => {
                        cmd.args(["-n", "htdemucs"]);
                    }
                    n => {
                        return Err(Error::Unsupported(format!(
                            "demucs does not provide a {}-stem model",
                            n
                        )))
                    }
                }
                cmd.arg(input);
            }
        }
        Ok(cmd)
    }

    /// File name the tool uses for `stem`.
    fn tool_stem_name<'a>(&self, stem: &'a str) -> &'a str {
        match (self.splitter, stem) {
            (SplitterType::Demucs, "accompaniment") => "no_vocals",
            _ => stem,
        }
    }

    /// Separate `input`, leaving one file per model stem in `dest_dir`.
    ///
    /// `dest_dir` is replaced if it already exists, so a re-run after a
    /// crash starts clean. Returns `(stem, path)` pairs in model order.
    pub fn separate(&self, input: &Path, dest_dir: &Path) -> Result<Vec<(String, PathBuf)>> {
        if !input.exists() {
            return Err(Error::file_not_found(input));
        }
        let parent = dest_dir
            .parent()
            .ok_or_else(|| Error::InvalidInput("stems directory has no parent".into()))?;
        let workspace = Workspace::new_in(parent, input)?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            splitter = %self.splitter,
            stems = self.stems.get(),
            input = %input.display(),
            "Running source separation"
        );

        run(self.command(input, workspace.temp_dir())?, self.splitter.binary())?;
        collect_stems(self, workspace.temp_dir(), dest_dir)
    }
}

/// Move one file per model stem from a tool output tree into `dest_dir`.
fn collect_stems(
    tool: &SeparatorTool,
    raw_root: &Path,
    dest_dir: &Path,
) -> Result<Vec<(String, PathBuf)>> {
    let mut found = Vec::new();
    for stem in tool.stems.stems() {
        let src = find_stem_file(raw_root, tool.tool_stem_name(stem)).ok_or_else(|| {
            Error::tool_failed(
                tool.splitter.binary(),
                format!("no '{}' stem in tool output", stem),
            )
        })?;
        found.push((stem.to_string(), src));
    }

    if dest_dir.exists() {
        std::fs::remove_dir_all(dest_dir)?;
    }
    std::fs::create_dir_all(dest_dir)?;

    let mut placed = Vec::with_capacity(found.len());
    for (stem, src) in found {
        let ext = src.extension().and_then(|e| e.to_str()).unwrap_or("wav");
        let dest = dest_dir.join(format!("{}.{}", stem, ext));
        move_file(&src, &dest)?;
        placed.push((stem, dest));
    }
    Ok(placed)
}

/// Find `<stem>.<ext>` anywhere under `root`, for any stem extension.
pub fn find_stem_file(root: &Path, stem: &str) -> Option<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .find(|path| {
            let name_matches = path.file_stem().and_then(|s| s.to_str()) == Some(stem);
            let ext_matches = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| STEM_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                .unwrap_or(false);
            name_matches && ext_matches
        })
}
