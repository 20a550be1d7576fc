// src/error.rs
//! Error taxonomy for the harvesting core.
//!
//! Only [`SourceError`] ever leaves a [`crate::source::SourceRunner`].
//! Transform and cache failures are absorbed where they happen.

use std::time::Duration;

use thiserror::Error;

/// Outbound fetch failure. Retryable by [`crate::fetch::RetryingFetcher`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },
}

impl TransportError {
    pub fn url(&self) -> &str {
        match self {
            Self::Timeout { url, .. } | Self::Status { url, .. } | Self::Network { url, .. } => url,
        }
    }
}

/// Failure of a whole source run (the runner's failure path).
#[derive(Debug, Error)]
pub enum SourceError {
    /// Fetch still failing after every retry.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Site-specific extraction failed. Not retried by the core.
    #[error("adapter failed: {0:#}")]
    Adapter(anyhow::Error),

    #[error("source run exceeded {0:?}")]
    RunTimeout(Duration),

    #[error("unknown source `{0}`")]
    UnknownSource(String),
}

impl SourceError {
    pub fn adapter(msg: impl std::fmt::Display) -> Self {
        Self::Adapter(anyhow::anyhow!("{msg}"))
    }
}

impl From<anyhow::Error> for SourceError {
    fn from(e: anyhow::Error) -> Self {
        // Adapters that bubble a transport failure through anyhow keep its class.
        match e.downcast::<TransportError>() {
            Ok(t) => Self::Transport(t),
            Err(e) => Self::Adapter(e),
        }
    }
}

/// A single record could not be normalized. The record is dropped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("record `{record}`: {reason}")]
pub struct TransformError {
    pub record: String,
    pub reason: String,
}

impl TransformError {
    pub fn new(record: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            record: record.into(),
            reason: reason.into(),
        }
    }
}

/// Internal cache failure classes. All of them read as a miss.
#[derive(Debug, Error)]
pub(crate) enum CacheError {
    #[error("cache entry not found")]
    NotFound,

    #[error("cache entry expired")]
    Expired,

    #[error("cache entry signature mismatch")]
    Integrity,

    #[error("cache entry malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("cache io: {0}")]
    Io(#[from] std::io::Error),
}
