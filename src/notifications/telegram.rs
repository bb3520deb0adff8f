use crate::config::TelegramConfig;
use anyhow::Result;
use reqwest::Client;
use serde_json::json;

pub struct TelegramClient {
    client: Client,
    api_url: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig, client: Client) -> Self {
        Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
        }
    }

    /// Send `text` to the configured chat via the Bot API `sendMessage` call.
    pub async fn send(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.bot_token);

        let response = self
            .client
            .post(&url)
            .json(&json!({ "chat_id": self.chat_id, "text": text }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Telegram sendMessage failed ({}): {}", status, body);
        }

        Ok(())
    }
}
