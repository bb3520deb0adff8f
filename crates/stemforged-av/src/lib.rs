//! # stemforged-av
//!
//! Audio tooling for the karaoke pipeline.
//!
//! This crate provides:
//! - Source separation through the `spleeter` or `demucs` command-line tools
//! - Chunked separation support (ffprobe duration, ffmpeg segment and concat)
//! - Stem mixing with ffmpeg `amix`
//! - Tag, property and artwork I/O through lofty
//! - External tool detection
//!
//! ## Features
//!
//! - `tracing` - Enable tracing support
//!
//! ## Example
//!
//! ```no_run
//! use stemforged_av::{read_tags, SeparatorTool};
//! use stemforged_common::{SplitterType, StemCount};
//! use std::path::Path;
//!
//! let report = read_tags(Path::new("/data/queue/song.mp3"))?;
//! println!("artist: {:?}", report.tags.artist);
//!
//! let tool = SeparatorTool::new(SplitterType::Spleeter, StemCount::FOUR);
//! let stems = tool.separate(Path::new("/data/queue/song.mp3"), Path::new("/data/stems/job"))?;
//! for (stem, path) in stems {
//!     println!("{stem}: {}", path.display());
//! }
//! # Ok::<(), stemforged_av::Error>(())
//! ```

mod error;
pub mod chunk;
pub mod mix;
pub mod separate;
pub mod tags;
pub mod tools;
pub mod workspace;

// Re-exports
pub use error::{Error, Result};
pub use mix::mix_stems;
pub use separate::{find_stem_file, SeparatorTool};
pub use tags::{read_tags, write_tags, AudioProperties, AudioTags, CoverArt, TagReport};
pub use tools::{check_tool, check_tools, get_tool_path, require_tool, ToolInfo};
pub use workspace::Workspace;
