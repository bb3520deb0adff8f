//! Path utilities for audio file detection and output naming.

use std::path::Path;

/// Audio file extensions accepted at intake.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "m4a"];

/// Characters that cannot appear in an output path component.
const FORBIDDEN_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Check if a path has a supported audio file extension.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use stemforged_common::paths::is_audio_file;
///
/// assert!(is_audio_file(Path::new("song.mp3")));
/// assert!(is_audio_file(Path::new("/music/Track.FLAC")));
/// assert!(!is_audio_file(Path::new("notes.txt")));
/// ```
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Same check as [`is_audio_file`], for a bare file name string.
pub fn is_allowed_filename(name: &str) -> bool {
    is_audio_file(Path::new(name))
}

/// Replace characters that are unsafe in file names with `_`.
///
/// An empty or whitespace-only input yields `fallback`.
///
/// ```
/// use stemforged_common::paths::sanitize_component;
///
/// assert_eq!(sanitize_component("AC/DC", "Unknown"), "AC_DC");
/// assert_eq!(sanitize_component("  ", "Unknown"), "Unknown");
/// ```
pub fn sanitize_component(name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if FORBIDDEN_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        fallback.to_string()
    } else {
        cleaned
    }
}

/// Lowercased extension of a path including the leading dot, or an empty string.
pub fn dotted_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}
