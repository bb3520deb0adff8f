//! Configuration persistence using toml_edit to preserve formatting and comments.

use anyhow::{Context, Result};
use std::path::Path;
use stemforged_common::PipelineSettings;
use toml_edit::DocumentMut;

/// Replace the `[pipeline]` table of the config file, keeping everything else.
///
/// A missing file is created containing only the pipeline table.
pub fn update_pipeline(path: &Path, settings: &PipelineSettings) -> Result<()> {
    let content = if path.exists() {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?
    } else {
        String::new()
    };

    let mut doc: DocumentMut = content
        .parse()
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    let pipeline_toml = toml::to_string(&PipelineWrapper {
        pipeline: settings.clone(),
    })
    .with_context(|| "Failed to serialize pipeline settings")?;
    let pipeline_doc: DocumentMut = pipeline_toml
        .parse()
        .with_context(|| "Failed to parse serialized pipeline settings")?;

    match pipeline_doc.get("pipeline") {
        Some(item) => doc["pipeline"] = item.clone(),
        None => {
            doc.remove("pipeline");
        }
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
    }
    std::fs::write(path, doc.to_string())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    Ok(())
}

#[derive(serde::Serialize)]
struct PipelineWrapper {
    pipeline: PipelineSettings,
}
