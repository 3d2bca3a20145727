use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use shared::{
    domain::{Channel, ChannelId, PostId, PostPage, Timestamp},
    error::ApiException,
};
use tracing::debug;
use url::Url;

use crate::{collaborators::RemotePostSource, config::SyncSettings};

pub const DEFAULT_POSTS_PAGE_SIZE: u32 = 60;

/// [`RemotePostSource`] backed by the message store's REST API (`/api/v4`).
pub struct HttpPostSource {
    http: Client,
    base_url: Url,
    auth_token: Option<String>,
    page_size: u32,
}

impl HttpPostSource {
    pub fn new(server_url: &str) -> Result<Self> {
        Self::with_client(Client::new(), server_url)
    }

    pub fn from_settings(settings: &SyncSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .context("failed to build http client")?;
        let mut source = Self::with_client(http, &settings.server_url)?;
        source.auth_token = settings.auth_token.clone();
        source.page_size = settings.posts_page_size;
        Ok(source)
    }

    fn with_client(http: Client, server_url: &str) -> Result<Self> {
        let base_url = Url::parse(server_url.trim())
            .with_context(|| format!("invalid server url '{server_url}'"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("server url '{server_url}' cannot be used as a base"));
        }
        Ok(Self {
            http,
            base_url,
            auth_token: None,
            page_size: DEFAULT_POSTS_PAGE_SIZE,
        })
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, 200);
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("server url cannot be a base"))?
            .pop_if_empty()
            .extend(["api", "v4"])
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, query: &[(&str, String)]) -> Result<T> {
        debug!(url = %url, "http: GET");
        let mut request = self.http.get(url.clone()).query(query);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiException::from_response_body(status.as_u16(), &body).into());
        }
        response
            .json()
            .await
            .with_context(|| format!("invalid response body from {url}"))
    }

    fn channel_posts_url(&self, channel_id: &ChannelId) -> Result<Url> {
        self.endpoint(&["channels", channel_id.as_str(), "posts"])
    }
}

#[async_trait]
impl RemotePostSource for HttpPostSource {
    async fn fetch_recent(&self, channel_id: &ChannelId) -> Result<PostPage> {
        let url = self.channel_posts_url(channel_id)?;
        self.get_json(
            url,
            &[("page", "0".to_string()), ("per_page", self.page_size.to_string())],
        )
        .await
    }

    async fn fetch_since(&self, channel_id: &ChannelId, since: Timestamp) -> Result<PostPage> {
        let url = self.channel_posts_url(channel_id)?;
        self.get_json(url, &[("since", since.0.to_string())]).await
    }

    async fn fetch_before(&self, channel_id: &ChannelId, before: &PostId) -> Result<PostPage> {
        let url = self.channel_posts_url(channel_id)?;
        self.get_json(
            url,
            &[
                ("before", before.to_string()),
                ("page", "0".to_string()),
                ("per_page", self.page_size.to_string()),
            ],
        )
        .await
    }

    async fn fetch_channel_by_team_and_name(
        &self,
        team_name: &str,
        channel_name: &str,
    ) -> Result<Channel> {
        let url = self.endpoint(&["teams", "name", team_name, "channels", "name", channel_name])?;
        self.get_json(url, &[]).await
    }
}

#[cfg(test)]
#[path = "tests/http_source_tests.rs"]
mod tests;
