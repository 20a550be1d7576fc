// src/source/types.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Declared trustworthiness of a source's markup/feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReliabilityTier {
    High,
    #[default]
    Medium,
    Low,
}

/// Per-source override of the fetcher's default rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitOverride {
    pub max_requests_per_minute: u32,
    /// Fixed pause applied after every request.
    #[serde(default)]
    pub delay_ms: u64,
}

/// Immutable registration-time description of a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub key: String,
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub reliability: ReliabilityTier,
    #[serde(default = "default_update_frequency_hours")]
    pub update_frequency_hours: u32,
    #[serde(default)]
    pub rate_limit: Option<RateLimitOverride>,
}

fn default_update_frequency_hours() -> u32 {
    24
}

impl SourceConfig {
    pub fn new(key: impl Into<String>, name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            base_url: base_url.into(),
            reliability: ReliabilityTier::default(),
            update_frequency_hours: default_update_frequency_hours(),
            rate_limit: None,
        }
    }

    pub fn with_reliability(mut self, tier: ReliabilityTier) -> Self {
        self.reliability = tier;
        self
    }

    pub fn with_rate_limit(mut self, max_requests_per_minute: u32, delay_ms: u64) -> Self {
        self.rate_limit = Some(RateLimitOverride {
            max_requests_per_minute,
            delay_ms,
        });
        self
    }
}

/// Runtime health of one source. Snapshots of this are handed out; the
/// live copy belongs to the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHealth {
    pub enabled: bool,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub events_produced: usize,
}

impl Default for SourceHealth {
    fn default() -> Self {
        Self {
            enabled: true,
            last_attempt: None,
            last_success: None,
            consecutive_failures: 0,
            last_error: None,
            events_produced: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillRef {
    pub number: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Unvalidated event candidate as produced by an adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub name: String,
    /// Free-form date (may carry a time component). Parsed by the transformer.
    pub date: String,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub committee: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub bills: Vec<BillRef>,
}

impl RawRecord {
    pub fn new(name: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            date: date.into(),
            ..Self::default()
        }
    }
}

/// The downstream contract: sanitized, dated, deduplicable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// `<source key>-<YYYY-MM-DD>-<slug>`, stable across runs.
    pub id: String,
    pub name: String,
    pub date: NaiveDate,
    pub time: String,
    pub location: Option<String>,
    pub committee: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub public_participation: bool,
    pub bills: Vec<BillRef>,
    pub source_key: String,
    pub source_url: String,
}
