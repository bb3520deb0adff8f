use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Tracks files and determines when they've "settled" (stopped growing)
pub struct FileSettleTracker {
    /// Last observed size and when it last changed
    pending: HashMap<PathBuf, (u64, Instant)>,
    /// How long a file's size must stay unchanged
    settle_duration: Duration,
}

impl FileSettleTracker {
    pub fn new(settle_secs: u64) -> Self {
        Self {
            pending: HashMap::new(),
            settle_duration: Duration::from_secs(settle_secs),
        }
    }

    /// Record that a file was created or written to
    pub fn file_changed(&mut self, path: PathBuf) {
        let size = file_size(&path).unwrap_or(0);
        self.pending.insert(path, (size, Instant::now()));
    }

    /// Remove and return files whose size has been stable for the settle
    /// duration. Files that vanished are dropped.
    pub fn take_settled(&mut self) -> Vec<PathBuf> {
        self.take_settled_at(Instant::now())
    }

    fn take_settled_at(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut settled = Vec::new();
        let mut gone = Vec::new();

        for (path, (size, since)) in self.pending.iter_mut() {
            let Some(current) = file_size(path) else {
                gone.push(path.clone());
                continue;
            };
            if current != *size {
                *size = current;
                *since = now;
            } else if now.duration_since(*since) >= self.settle_duration {
                settled.push(path.clone());
            }
        }

        for path in gone.iter().chain(settled.iter()) {
            self.pending.remove(path);
        }
        settled
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.pending.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_file_settles() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.mp3");
        std::fs::write(&file, b"abc").unwrap();

        let mut tracker = FileSettleTracker::new(0);
        tracker.file_changed(file.clone());
        assert_eq!(tracker.take_settled(), vec![file.clone()]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_growing_file_restarts_timer() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.mp3");
        std::fs::write(&file, b"abc").unwrap();

        let mut tracker = FileSettleTracker::new(5);
        tracker.file_changed(file.clone());
        std::fs::write(&file, b"abcdef").unwrap();

        let later = Instant::now() + Duration::from_secs(10);
        assert!(tracker.take_settled_at(later).is_empty());
        assert!(tracker.is_pending(&file));

        let settled = tracker.take_settled_at(later + Duration::from_secs(5));
        assert_eq!(settled, vec![file]);
    }

    #[test]
    fn test_deleted_file_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.mp3");
        std::fs::write(&file, b"abc").unwrap();

        let mut tracker = FileSettleTracker::new(0);
        tracker.file_changed(file.clone());
        std::fs::remove_file(&file).unwrap();
        assert!(tracker.take_settled().is_empty());
        assert_eq!(tracker.len(), 0);
    }
}
