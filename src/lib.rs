//! Stemforged - karaoke stem-separation pipeline
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod notifications;
pub mod pipeline;
pub mod server;
pub mod state;
pub mod watch;
pub mod worker;

use anyhow::{Context, Result};
use std::sync::Arc;

/// Open the ledger and build the shared pipeline context for `config`.
pub fn open_pipeline(config: &config::Config) -> Result<Arc<pipeline::PipelineContext>> {
    let layout = config.paths.layout();
    layout
        .ensure_dirs()
        .with_context(|| format!("Failed to create data directories under {:?}", config.paths.data_dir))?;

    let db_path = config.paths.database_path();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {:?}", parent))?;
    }
    tracing::info!("Initializing database at {}", db_path.display());
    let db = stemforged_db::pool::init_pool(&db_path.to_string_lossy())?;

    let state = state::AppState::new(config.pipeline.clone());
    Ok(Arc::new(pipeline::PipelineContext::new(config, db, state)))
}
