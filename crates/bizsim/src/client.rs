//! HTTP client for the simulation REST API.

use std::time::Duration;

use anyhow::{Context as _, Result};
use serde_json::Value;
use url::Url;

/// Thin JSON-over-HTTP client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: Url,
    http: reqwest::Client,
}

impl ApiClient {
    /// Create a client rooted at `base_url` with a per-request timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base(base_url)?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("bizsim/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { base_url, http })
    }

    /// Resolve a resource path against the base URL.
    ///
    /// Leading slashes are ignored so `/teams/42` stays under the base path.
    pub fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("invalid resource path '{}'", path))
    }

    /// GET a resource and decode the body as JSON.
    pub async fn get_json(&self, path: &str) -> Result<Value> {
        let url = self.url(path)?;
        tracing::debug!(%url, "GET");

        let response = self.http.get(url.clone()).send().await?;

        if !response.status().is_success() {
            anyhow::bail!("{} returned {}", url, response.status());
        }

        Ok(response.json().await?)
    }
}

/// Parse the base URL, forcing a trailing slash so joins append.
fn normalize_base(base_url: &str) -> Result<Url> {
    let mut url = Url::parse(base_url).with_context(|| format!("invalid API URL '{}'", base_url))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
