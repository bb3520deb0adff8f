pub mod slack;
pub mod telegram;

pub use slack::SlackClient;
pub use telegram::TelegramClient;

use crate::config::NotificationsConfig;
use reqwest::Client;
use std::time::Duration;
use stemforged_common::Stage;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Failure alerts for jobs that reach the `error` status.
pub struct NotificationManager {
    telegram: Option<TelegramClient>,
    slack: Option<SlackClient>,
}

/// Alert text for a job that failed in `stage`.
pub fn failure_message(stage: Stage, filename: &str, error: &str) -> String {
    format!("{} FAILED: {}\n{}", stage, filename, error)
}

impl NotificationManager {
    pub fn new(config: &NotificationsConfig) -> Self {
        let client = Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client: {}", e);
                Client::new()
            });

        Self {
            telegram: config
                .telegram
                .as_ref()
                .map(|t| TelegramClient::new(t, client.clone())),
            slack: config.slack.as_ref().map(|s| SlackClient::new(s, client)),
        }
    }

    /// Send a failure alert to every configured target.
    /// This method is fire-and-forget - errors are logged but not propagated.
    pub async fn notify_failure(&self, stage: Stage, filename: &str, error: &str) {
        if !self.has_targets() {
            return;
        }
        let text = failure_message(stage, filename, error);

        if let Some(ref telegram) = self.telegram {
            match telegram.send(&text).await {
                Ok(()) => tracing::info!("Telegram alert sent for {}", filename),
                Err(e) => tracing::warn!("Failed to notify Telegram: {}", e),
            }
        }
        if let Some(ref slack) = self.slack {
            match slack.send(&text).await {
                Ok(()) => tracing::info!("Slack alert sent for {}", filename),
                Err(e) => tracing::warn!("Failed to notify Slack: {}", e),
            }
        }
    }

    /// Check if there are any notification targets
    pub fn has_targets(&self) -> bool {
        self.telegram.is_some() || self.slack.is_some()
    }
}
