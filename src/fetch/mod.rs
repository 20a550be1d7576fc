// src/fetch/mod.rs
//! Outbound fetch capability handed to adapters: rate limited, timed out, retried.

pub mod rate_limit;

pub use rate_limit::{RateLimiter, DEFAULT_MAX_REQUESTS_PER_MINUTE};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use metrics::counter;
use serde::de::DeserializeOwned;

use crate::error::{SourceError, TransportError};

pub const DEFAULT_USER_AGENT: &str =
    "civic-events-harvester/0.1 (+https://github.com/civic-events/harvester)";

/// "Fetch the text body of a URL". Non-2xx answers are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String, TransportError>;
}

/// Production transport over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(4))
            .build()
            .context("building reqwest client")?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get_text(&self, url: &str) -> Result<String, TransportError> {
        let network = |e: reqwest::Error| TransportError::Network {
            url: url.to_string(),
            message: e.to_string(),
        };

        let resp = self.client.get(url).send().await.map_err(network)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        resp.text().await.map_err(network)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSettings {
    /// Hard per-attempt timeout.
    pub timeout: Duration,
    pub max_attempts: u32,
    /// The delay before attempt `n + 1` is `n * backoff_base`.
    pub backoff_base: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            backoff_base: Duration::from_millis(1000),
        }
    }
}

impl FetchSettings {
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt)
    }
}

/// Rate-limited fetcher with per-attempt timeout and linear backoff.
/// One per source; cheap to share behind an `Arc`.
#[derive(Clone)]
pub struct RetryingFetcher {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    settings: FetchSettings,
}

impl std::fmt::Debug for RetryingFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingFetcher")
            .field("limiter", &self.limiter)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RetryingFetcher {
    pub fn new(transport: Arc<dyn Transport>, limiter: Arc<RateLimiter>, settings: FetchSettings) -> Self {
        Self {
            transport,
            limiter,
            settings,
        }
    }

    pub fn with_settings(mut self, settings: FetchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// GET `url` as text. The last error is returned only once every
    /// attempt has failed.
    pub async fn fetch_text(&self, url: &str) -> Result<String, TransportError> {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            self.limiter.acquire().await;
            counter!("fetch_attempts_total").increment(1);

            let result = match tokio::time::timeout(self.settings.timeout, self.transport.get_text(url)).await {
                Ok(r) => r,
                Err(_) => Err(TransportError::Timeout {
                    url: url.to_string(),
                    after: self.settings.timeout,
                }),
            };
            self.limiter.pace().await;

            match result {
                Ok(body) => return Ok(body),
                Err(e) if attempt >= max_attempts => {
                    tracing::warn!(target: "fetch", url, attempts = attempt, error = %e, "fetch failed; giving up");
                    return Err(e);
                }
                Err(e) => {
                    let backoff = self.settings.backoff_for(attempt);
                    counter!("fetch_retries_total").increment(1);
                    tracing::debug!(
                        target: "fetch",
                        url,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "fetch attempt failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    /// GET `url` and decode JSON. Decode failures are adapter errors (not retried).
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        let body = self.fetch_text(url).await?;
        let parsed = serde_json::from_str(&body).with_context(|| format!("decoding JSON from {url}"))?;
        Ok(parsed)
    }
}
