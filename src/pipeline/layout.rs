//! On-disk layout of the data directory.

use std::path::{Path, PathBuf};
use stemforged_common::paths::sanitize_component;
use stemforged_common::JobId;

/// Artist directory used when a track credits several artists.
pub const VARIOUS_ARTISTS: &str = "Various Artists";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    pub input: PathBuf,
    pub queue: PathBuf,
    pub metadata: PathBuf,
    pub stems: PathBuf,
    pub output: PathBuf,
    pub archive: PathBuf,
    pub error: PathBuf,
    pub logs: PathBuf,
}

impl DataLayout {
    /// Layout with every directory directly under `root`.
    pub fn under(root: &Path) -> Self {
        Self {
            input: root.join("input"),
            queue: root.join("queue"),
            metadata: root.join("metadata"),
            stems: root.join("stems"),
            output: root.join("output"),
            archive: root.join("archive"),
            error: root.join("error"),
            logs: root.join("logs"),
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            &self.input,
            &self.queue,
            &self.metadata,
            &self.stems,
            &self.output,
            &self.archive,
            &self.error,
            &self.logs,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn queue_file(&self, filename: &str) -> PathBuf {
        self.queue.join(filename)
    }

    /// Mirror of the job's ledger state next to the queued file.
    pub fn jobstate_file(&self, filename: &str) -> PathBuf {
        self.queue.join(format!("{}.jobstate.json", filename))
    }

    pub fn sidecar(&self, id: JobId) -> PathBuf {
        self.metadata.join(format!("{}.json", id))
    }

    /// Cover art saved for a job; `ext` has no leading dot.
    pub fn cover_file(&self, id: JobId, ext: &str) -> PathBuf {
        self.metadata.join(format!("{}.{}", id, ext))
    }

    pub fn stems_dir(&self, id: JobId) -> PathBuf {
        self.stems.join(id.to_string())
    }

    pub fn error_file(&self, filename: &str) -> PathBuf {
        self.error.join(filename)
    }

    pub fn archive_file(&self, filename: &str) -> PathBuf {
        self.archive.join(filename)
    }

    pub fn processed_log(&self) -> PathBuf {
        self.logs.join("processed.log")
    }

    /// `output/<Artist>/<Album>`, with both components sanitized.
    pub fn album_dir(&self, artist: &str, album: &str) -> PathBuf {
        let artist = if artist.contains(',') || artist.contains('&') {
            VARIOUS_ARTISTS
        } else {
            artist
        };
        self.output
            .join(sanitize_component(artist, "Unknown Artist"))
            .join(sanitize_component(album, "Unknown Album"))
    }

    /// Final location of a packaged track. `ext` includes the leading dot.
    pub fn output_file(&self, artist: &str, album: &str, title: &str, ext: &str) -> PathBuf {
        self.album_dir(artist, album)
            .join(format!("{}{}", sanitize_component(title, "Untitled"), ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_file_sanitizes_components() {
        let layout = DataLayout::under(Path::new("/data"));
        let path = layout.output_file("AC/DC", "Back: In Black", "Hells?Bells", ".mp3");
        assert_eq!(
            path,
            PathBuf::from("/data/output/AC_DC/Back_ In Black/Hells_Bells.mp3")
        );
    }

    #[test]
    fn test_multiple_artists_filed_under_various() {
        let layout = DataLayout::under(Path::new("/data"));
        assert_eq!(
            layout.album_dir("Simon & Garfunkel", "Bookends"),
            PathBuf::from("/data/output/Various Artists/Bookends")
        );
        assert_eq!(
            layout.album_dir("A, B", "C"),
            PathBuf::from("/data/output/Various Artists/C")
        );
    }

    #[test]
    fn test_job_paths() {
        let layout = DataLayout::under(Path::new("/d"));
        let id = JobId::new();
        assert_eq!(layout.sidecar(id), PathBuf::from(format!("/d/metadata/{}.json", id)));
        assert_eq!(layout.stems_dir(id), PathBuf::from(format!("/d/stems/{}", id)));
        assert_eq!(
            layout.jobstate_file("x.mp3"),
            PathBuf::from("/d/queue/x.mp3.jobstate.json")
        );
    }

    #[test]
    fn test_ensure_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::under(dir.path());
        layout.ensure_dirs().unwrap();
        assert!(layout.queue.is_dir());
        assert!(layout.logs.is_dir());
    }
}
