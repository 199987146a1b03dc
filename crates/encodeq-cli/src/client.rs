//! Minimal HTTP client for the encodeq API.

use anyhow::{Context, Result, bail};
use encodeq_core::{Job, Submission};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

pub struct ApiClient {
    base: Url,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(api_url: &str) -> Result<Self> {
        let mut base = Url::parse(api_url).with_context(|| format!("invalid API URL {}", api_url))?;
        // Without a trailing slash `join` would replace the last path segment.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            base,
            http: reqwest::Client::new(),
        })
    }

    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("invalid endpoint {}", path))
    }

    pub async fn submit(&self, submission: &Submission) -> Result<Job> {
        let url = self.endpoint("api/v1/jobs")?;
        debug!(%url, "POST");
        let response = self.http.post(url).json(submission).send().await?;
        decode(response).await
    }

    pub async fn list(&self) -> Result<Vec<Job>> {
        let url = self.endpoint("api/v1/jobs")?;
        debug!(%url, "GET");
        decode(self.http.get(url).send().await?).await
    }

    pub async fn get(&self, id: u64) -> Result<Job> {
        let url = self.endpoint(&format!("api/v1/jobs/{}", id))?;
        debug!(%url, "GET");
        decode(self.http.get(url).send().await?).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let message = response
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|body| body["error"].as_str().map(str::to_string))
        .unwrap_or_else(|| status.to_string());

    if status == StatusCode::SERVICE_UNAVAILABLE {
        bail!("server unavailable, try again later: {}", message);
    }
    bail!("request failed ({}): {}", status, message)
}
