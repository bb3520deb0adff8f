//! Stemforged-Common: Shared types, constants, and utilities.
//!
//! This crate provides common functionality used across stemforged:
//!
//! - **Typed IDs**: Type-safe UUID wrappers for jobs and users
//! - **Core Types**: Job status, pipeline stages, splitter and stem definitions
//! - **Settings**: Pipeline settings that are snapshotted into every job
//! - **Path Utilities**: Audio extension checks and path component sanitizing
//! - **Error Handling**: Common error types and result aliases
//!
//! # Examples
//!
//! ```
//! use stemforged_common::{JobId, JobStatus, Error, Result};
//! use stemforged_common::paths::is_audio_file;
//! use std::path::Path;
//!
//! let job_id = JobId::new();
//! assert_eq!(JobStatus::Waiting.next(), Some(JobStatus::MetadataExtracted));
//! assert!(is_audio_file(Path::new("song.flac")));
//!
//! fn example() -> Result<()> {
//!     Err(Error::not_found("Job"))
//! }
//! ```

pub mod error;
pub mod ids;
pub mod paths;
pub mod settings;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use settings::{PipelineSettings, SettingsUpdate};
pub use types::*;
