use crate::config::SlackConfig;
use anyhow::Result;
use reqwest::Client;
use serde_json::json;

pub struct SlackClient {
    client: Client,
    webhook_url: String,
}

impl SlackClient {
    pub fn new(config: &SlackConfig, client: Client) -> Self {
        Self {
            client,
            webhook_url: config.webhook_url.clone(),
        }
    }

    /// Post `text` to the incoming webhook.
    pub async fn send(&self, text: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&json!({ "text": text }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Slack webhook failed ({}): {}", status, body);
        }

        Ok(())
    }
}
