//! Album and playlist descriptors dropped next to watched files.

use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;
use stemforged_common::{CollectionInfo, CollectionKind};

pub const PLAYLIST_INFO_FILE: &str = "playlist.json";
pub const ALBUM_INFO_FILE: &str = "album.json";

#[derive(Debug, Deserialize)]
struct CollectionFile {
    #[serde(default)]
    name: String,
}

/// Collection context for an audio file, from the descriptor in its
/// directory. A playlist descriptor wins over an album one.
pub fn collection_for(file: &Path) -> Option<CollectionInfo> {
    let dir = file.parent()?;
    let file_name = file.file_name()?.to_str()?;

    if let Some(name) = read_name(&dir.join(PLAYLIST_INFO_FILE)) {
        return Some(CollectionInfo {
            kind: CollectionKind::Playlist,
            name,
            track_number: None,
        });
    }

    let name = read_name(&dir.join(ALBUM_INFO_FILE))?;
    Some(CollectionInfo {
        kind: CollectionKind::Album,
        name,
        track_number: track_number(file_name),
    })
}

fn read_name(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<CollectionFile>(&content) {
        Ok(info) => Some(info.name.trim().to_string()),
        Err(e) => {
            tracing::error!("Error reading {:?}: {}", path, e);
            None
        }
    }
}

/// Leading track number of a file name such as `"01 - Song.mp3"`.
pub fn track_number(file_name: &str) -> Option<u32> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE
        .get_or_init(|| Regex::new(r"^(\d{1,3})(?:[\s.\-_]|$)").ok())
        .as_ref()?;
    re.captures(file_name)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_number() {
        assert_eq!(track_number("01 - Song.mp3"), Some(1));
        assert_eq!(track_number("12. Closer.flac"), Some(12));
        assert_eq!(track_number("Song 01.mp3"), None);
        assert_eq!(track_number("2024mix.mp3"), None);
    }

    #[test]
    fn test_album_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ALBUM_INFO_FILE), r#"{"name": "Live Set"}"#).unwrap();

        let info = collection_for(&dir.path().join("03 - Encore.mp3")).unwrap();
        assert_eq!(info.kind, CollectionKind::Album);
        assert_eq!(info.name, "Live Set");
        assert_eq!(info.track_number, Some(3));
    }

    #[test]
    fn test_playlist_wins_and_has_no_track() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ALBUM_INFO_FILE), r#"{"name": "A"}"#).unwrap();
        std::fs::write(dir.path().join(PLAYLIST_INFO_FILE), r#"{"name": "Road Trip"}"#).unwrap();

        let info = collection_for(&dir.path().join("01 - x.mp3")).unwrap();
        assert_eq!(info.kind, CollectionKind::Playlist);
        assert_eq!(info.track_number, None);
    }

    #[test]
    fn test_no_or_broken_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collection_for(&dir.path().join("x.mp3")).is_none());

        std::fs::write(dir.path().join(ALBUM_INFO_FILE), "not json").unwrap();
        assert!(collection_for(&dir.path().join("x.mp3")).is_none());
    }
}
