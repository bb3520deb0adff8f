use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use stemforged_common::PipelineSettings;

use crate::pipeline::layout::DataLayout;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub workers: WorkersConfig,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub cover_art: CoverArtConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub static_dir: Option<PathBuf>,

    /// Largest accepted upload in megabytes
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,

    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Require a bearer token on the API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lifetime of login tokens in seconds
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    /// Password for the `admin` account created on first start
    #[serde(default = "default_admin_password")]
    pub default_admin_password: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_upload_mb() -> usize {
    512
}
fn default_true() -> bool {
    true
}
fn default_token_ttl() -> u64 {
    3600
}
fn default_admin_password() -> String {
    "admin".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: None,
            max_upload_mb: default_max_upload_mb(),
            auth: AuthConfig::default(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token_ttl_secs: default_token_ttl(),
            default_admin_password: default_admin_password(),
        }
    }
}

/// Filesystem layout. Every directory defaults to a child of `data_dir`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub input_dir: Option<PathBuf>,
    #[serde(default)]
    pub queue_dir: Option<PathBuf>,
    #[serde(default)]
    pub metadata_dir: Option<PathBuf>,
    #[serde(default)]
    pub stems_dir: Option<PathBuf>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,
    #[serde(default)]
    pub error_dir: Option<PathBuf>,
    #[serde(default)]
    pub logs_dir: Option<PathBuf>,

    /// SQLite ledger; defaults to `<data_dir>/stemforged.db`
    #[serde(default)]
    pub database: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            input_dir: None,
            queue_dir: None,
            metadata_dir: None,
            stems_dir: None,
            output_dir: None,
            archive_dir: None,
            error_dir: None,
            logs_dir: None,
            database: None,
        }
    }
}

impl PathsConfig {
    pub fn layout(&self) -> DataLayout {
        let base = &self.data_dir;
        let pick = |o: &Option<PathBuf>, name: &str| o.clone().unwrap_or_else(|| base.join(name));
        DataLayout {
            input: pick(&self.input_dir, "input"),
            queue: pick(&self.queue_dir, "queue"),
            metadata: pick(&self.metadata_dir, "metadata"),
            stems: pick(&self.stems_dir, "stems"),
            output: pick(&self.output_dir, "output"),
            archive: pick(&self.archive_dir, "archive"),
            error: pick(&self.error_dir, "error"),
            logs: pick(&self.logs_dir, "logs"),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.data_dir.join("stemforged.db"))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds a file's size must stay unchanged before it is queued
    #[serde(default = "default_settle_time")]
    pub settle_time_secs: u64,
}

fn default_settle_time() -> u64 {
    5
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            settle_time_secs: default_settle_time(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkersConfig {
    /// Fallback poll interval when no wake-up arrives
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Claims older than this are considered abandoned
    #[serde(default = "default_claim_timeout")]
    pub claim_timeout_secs: u64,

    /// Names this process's workers in the ledger. Each `start` sharing a
    /// data directory needs its own value.
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
}

fn default_poll_interval() -> u64 {
    2000
}
fn default_claim_timeout() -> u64 {
    6 * 3600
}
fn default_instance_id() -> String {
    "main".to_string()
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            claim_timeout_secs: default_claim_timeout(),
            instance_id: default_instance_id(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoverArtConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_musicbrainz_url")]
    pub musicbrainz_url: String,

    #[serde(default = "default_coverart_url")]
    pub coverart_url: String,

    #[serde(default = "default_cover_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_musicbrainz_url() -> String {
    "https://musicbrainz.org/ws/2/".to_string()
}
fn default_coverart_url() -> String {
    "https://coverartarchive.org/".to_string()
}
fn default_cover_timeout() -> u64 {
    10
}
fn default_user_agent() -> String {
    format!(
        "stemforged/{} ( https://github.com/stemforged/stemforged )",
        env!("CARGO_PKG_VERSION")
    )
}

impl Default for CoverArtConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            musicbrainz_url: default_musicbrainz_url(),
            coverart_url: default_coverart_url(),
            timeout_secs: default_cover_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,

    #[serde(default)]
    pub spleeter_path: Option<PathBuf>,

    #[serde(default)]
    pub demucs_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,

    #[serde(default)]
    pub slack: Option<SlackConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,

    /// Override for tests and self-hosted bot API servers
    #[serde(default = "default_telegram_api")]
    pub api_url: String,
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlackConfig {
    pub webhook_url: String,
}
