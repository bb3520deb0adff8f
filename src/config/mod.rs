pub mod persist;
mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use stemforged_common::settings::MIN_CHUNK_FLOOR_MS;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Config file locations searched when none is given, in order.
const DEFAULT_PATHS: [&str; 4] = [
    "./config.toml",
    "./stemforged.toml",
    "~/.config/stemforged/config.toml",
    "/etc/stemforged/config.toml",
];

/// Find the config file that would be loaded, if any.
pub fn find_config_path(custom_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = custom_path {
        return Some(path.to_path_buf());
    }

    DEFAULT_PATHS
        .iter()
        .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
        .find(|p| p.exists())
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    match find_config_path(custom_path) {
        Some(path) => load_config(&path),
        None => Ok(Config::default()),
    }
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.server.auth.token_ttl_secs == 0 {
        anyhow::bail!("server.auth.token_ttl_secs must be positive");
    }

    let instance = &config.workers.instance_id;
    if instance.is_empty() || instance.contains('/') {
        anyhow::bail!("workers.instance_id must be non-empty and must not contain '/'");
    }

    let pipeline = &config.pipeline;
    if pipeline.chunk_length_ms < MIN_CHUNK_FLOOR_MS {
        anyhow::bail!(
            "pipeline.chunk_length_ms must be at least {}",
            MIN_CHUNK_FLOOR_MS
        );
    }
    if pipeline.max_retries == 0 {
        anyhow::bail!("pipeline.max_retries must be at least 1");
    }

    // An inconsistent default selection is not fatal: jobs snapshotting it fail
    // at intake or in separation with a configuration error.
    if let Err(e) = pipeline.validate() {
        tracing::warn!("Pipeline settings are inconsistent: {}", e);
    }

    if let Some(ref telegram) = config.notifications.telegram {
        if telegram.bot_token.is_empty() || telegram.chat_id.is_empty() {
            anyhow::bail!("Telegram notifications need both bot_token and chat_id");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stemforged_common::{SplitterType, StemCount};

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(config.server.auth.enabled);
        assert_eq!(config.server.auth.token_ttl_secs, 3600);
        assert_eq!(config.pipeline.stems, StemCount::FOUR);
        assert_eq!(config.pipeline.max_retries, 3);
        assert_eq!(config.paths.database_path(), PathBuf::from("./data/stemforged.db"));
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [server]
            port = 9000

            [paths]
            data_dir = "/srv/karaoke"
            output_dir = "/media/karaoke"

            [pipeline]
            splitter_type = "demucs"
            stems = 2
            stem_types = "vocals,accompaniment"
            chunking_enabled = true

            [notifications.slack]
            webhook_url = "https://hooks.slack.test/x"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        validate_config(&config).unwrap();

        assert_eq!(config.pipeline.splitter_type, SplitterType::Demucs);
        assert_eq!(config.pipeline.stems, StemCount::TWO);
        let layout = config.paths.layout();
        assert_eq!(layout.queue, PathBuf::from("/srv/karaoke/queue"));
        assert_eq!(layout.output, PathBuf::from("/media/karaoke"));
        assert!(config.notifications.slack.is_some());
    }

    #[test]
    fn test_invalid_stems_rejected_at_parse() {
        let result = toml::from_str::<Config>("[pipeline]\nstems = 3\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_instance_id() {
        let mut config = Config::default();
        assert_eq!(config.workers.instance_id, "main");
        config.workers.instance_id = "host/a".into();
        assert!(validate_config(&config).is_err());
        config.workers.instance_id = String::new();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[workers]\npoll_interval_ms = 50\n").unwrap();

        let config = load_config_or_default(Some(&path)).unwrap();
        assert_eq!(config.workers.poll_interval_ms, 50);
        assert!(load_config(&dir.path().join("missing.toml")).is_err());
    }
}
