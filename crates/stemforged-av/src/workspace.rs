//! Scratch directories for tool runs.

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Scratch space for one tool run.
///
/// Tools write into a temporary directory that lives next to the final
/// destination, so finalizing is a same-filesystem rename. Dropping the
/// workspace without finalizing discards everything the tool produced.
///
/// # Example
///
/// ```no_run
/// use stemforged_av::Workspace;
///
/// let workspace = Workspace::new_in("/data/output", "/data/queue/song.mp3")?;
/// // ffmpeg writes workspace.output()
/// workspace.finalize(std::path::Path::new("/data/output/Artist/Album/Song.mp3"))?;
/// # Ok::<(), stemforged_av::Error>(())
/// ```
pub struct Workspace {
    temp_dir: TempDir,
    output_path: PathBuf,
}

impl Workspace {
    /// Create a workspace inside `parent`, creating it if needed.
    pub fn new_in<D: AsRef<Path>, P: AsRef<Path>>(parent: D, input: P) -> Result<Self> {
        let parent = parent.as_ref();
        std::fs::create_dir_all(parent)?;
        let temp_dir = tempfile::Builder::new()
            .prefix(".work-")
            .tempdir_in(parent)
            .map_err(|e| Error::Workspace(e.to_string()))?;
        Self::with_dir(temp_dir, input.as_ref())
    }

    fn with_dir(temp_dir: TempDir, input: &Path) -> Result<Self> {
        let file_name = input
            .file_name()
            .ok_or_else(|| Error::InvalidInput("Invalid input file path".to_string()))?;
        let output_path = temp_dir.path().join(file_name);

        Ok(Self {
            temp_dir,
            output_path,
        })
    }

    /// Get the output file path.
    pub fn output(&self) -> &Path {
        &self.output_path
    }

    /// Get the temp directory path.
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Move the output to `dest`, replacing any existing file.
    ///
    /// An existing destination is kept as a backup until the move succeeds and
    /// restored if it fails.
    pub fn finalize(self, dest: &Path) -> Result<PathBuf> {
        if !self.output_path.exists() {
            return Err(Error::Workspace(format!(
                "Output file does not exist: {:?}",
                self.output_path
            )));
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if dest.exists() {
            let backup = dest.with_extension("bak");
            std::fs::rename(dest, &backup).map_err(|e| {
                Error::Workspace(format!("Failed to back up existing output: {}", e))
            })?;

            if let Err(e) = move_file(&self.output_path, dest) {
                let _ = std::fs::rename(&backup, dest);
                return Err(Error::Workspace(format!(
                    "Failed to move output to destination: {}",
                    e
                )));
            }

            let _ = std::fs::remove_file(&backup);
        } else {
            move_file(&self.output_path, dest).map_err(|e| {
                Error::Workspace(format!("Failed to move output to destination: {}", e))
            })?;
        }

        Ok(dest.to_path_buf())
    }
}

/// Rename, falling back to copy and delete across filesystems.
pub fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}
