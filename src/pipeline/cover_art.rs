//! Front-cover lookup through MusicBrainz and the Cover Art Archive.

use crate::config::CoverArtConfig;
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ReleaseSearch {
    #[serde(default)]
    releases: Vec<Release>,
}

#[derive(Debug, Deserialize)]
struct Release {
    id: String,
}

pub struct CoverArtClient {
    client: Client,
    musicbrainz_url: String,
    coverart_url: String,
}

impl CoverArtClient {
    pub fn new(config: &CoverArtConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client: {}", e);
                Client::new()
            });

        Self {
            client,
            musicbrainz_url: with_trailing_slash(&config.musicbrainz_url),
            coverart_url: with_trailing_slash(&config.coverart_url),
        }
    }

    /// Find a release for `artist`/`album` and download its front cover.
    ///
    /// `Ok(None)` means nothing matched.
    pub async fn fetch_front_cover(
        &self,
        artist: &str,
        album: &str,
        title: Option<&str>,
    ) -> Result<Option<Vec<u8>>> {
        let Some(release_id) = self.search_release(artist, album, title).await? else {
            return Ok(None);
        };

        let url = format!("{}release/{}/front", self.coverart_url, release_id);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            tracing::debug!("No front cover for release {} ({})", release_id, response.status());
            return Ok(None);
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(bytes.to_vec()))
    }

    async fn search_release(
        &self,
        artist: &str,
        album: &str,
        title: Option<&str>,
    ) -> Result<Option<String>> {
        let mut query = format!("release:{} AND artist:{}", album, artist);
        if let Some(title) = title {
            query.push_str(&format!(" AND recording:{}", title));
        }

        let url = format!("{}release", self.musicbrainz_url);
        let response = self
            .client
            .get(&url)
            .query(&[("query", query.as_str()), ("fmt", "json")])
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("MusicBrainz search failed ({})", response.status());
        }

        let search: ReleaseSearch = response
            .json()
            .await
            .context("Invalid MusicBrainz response")?;
        Ok(search.releases.into_iter().next().map(|r| r.id))
    }
}

fn with_trailing_slash(url: &str) -> String {
    format!("{}/", url.trim_end_matches('/'))
}
