// src/config.rs
//! Harvester configuration (TOML or JSON).
//!
//! Lookup order for [`load_default`]:
//! 1) `$HARVEST_CONFIG_PATH`
//! 2) `config/harvest.toml`
//! 3) `config/harvest.json`
//! 4) built-in defaults
//!
//! The cache signing secret is never read from here; see
//! [`crate::cache::secret_from_env`].

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::{JsonFeedAdapter, RssCalendarAdapter};
use crate::fetch::{FetchSettings, DEFAULT_MAX_REQUESTS_PER_MINUTE, DEFAULT_USER_AGENT};
use crate::source::{RateLimitOverride, ReliabilityTier, SourceAdapter, SourceConfig, SourceSpec};

pub const ENV_CONFIG_PATH: &str = "HARVEST_CONFIG_PATH";

const MIN_SCHEDULER_INTERVAL_SECS: u64 = 10;
const MIN_CLEANUP_INTERVAL_SECS: u64 = 1;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub cache: CacheSection,
    pub fetch: FetchSection,
    pub runner: RunnerSection,
    pub scheduler: SchedulerSection,
    pub server: ServerSection,
    pub sources: Vec<SourceEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub dir: PathBuf,
    /// TTL for cached adapter output.
    pub ttl_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("cache/harvest"),
            ttl_secs: 3600,
            cleanup_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    /// Applies to sources without their own `rate_limit`.
    pub max_requests_per_minute: u32,
    pub user_agent: String,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_attempts: 3,
            backoff_base_ms: 1000,
            max_requests_per_minute: DEFAULT_MAX_REQUESTS_PER_MINUTE,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetchSection {
    pub fn settings(&self) -> FetchSettings {
        FetchSettings {
            timeout: Duration::from_secs(self.timeout_secs),
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSection {
    /// Upper bound for one whole adapter invocation. Unset means no bound.
    pub run_timeout_secs: Option<u64>,
}

impl RunnerSection {
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub interval_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self { interval_secs: 3600 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8088".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Rss,
    Json,
}

/// One `[[sources]]` entry: source metadata plus which generic adapter
/// reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub key: String,
    pub name: String,
    pub base_url: String,
    /// Feed location when it differs from `base_url`.
    #[serde(default)]
    pub feed_url: Option<String>,
    #[serde(default)]
    pub kind: SourceKind,
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

impl SourceEntry {
    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            key: self.key.clone(),
            name: self.name.clone(),
            base_url: self.base_url.clone(),
            reliability: self.reliability,
            update_frequency_hours: self.update_frequency_hours,
            rate_limit: self.rate_limit,
        }
    }

    pub fn to_spec(&self) -> SourceSpec {
        let adapter: Arc<dyn SourceAdapter> = match (self.kind, self.feed_url.clone()) {
            (SourceKind::Rss, Some(url)) => Arc::new(RssCalendarAdapter::with_feed_url(url)),
            (SourceKind::Rss, None) => Arc::new(RssCalendarAdapter::new()),
            (SourceKind::Json, Some(url)) => Arc::new(JsonFeedAdapter::with_url(url)),
            (SourceKind::Json, None) => Arc::new(JsonFeedAdapter::new()),
        };
        SourceSpec {
            config: self.source_config(),
            adapter,
        }
    }
}

impl HarvestConfig {
    /// Trim keys, reject empty or duplicate ones, clamp numbers to usable
    /// minimums.
    pub fn validated(mut self) -> Result<Self> {
        let mut seen = HashSet::new();
        for (i, s) in self.sources.iter_mut().enumerate() {
            s.key = s.key.trim().to_string();
            if s.key.is_empty() {
                bail!("source #{i} has an empty key");
            }
            if !seen.insert(s.key.clone()) {
                bail!("duplicate source key `{}`", s.key);
            }
            if s.name.trim().is_empty() {
                s.name = s.key.clone();
            }
            if let Some(rl) = s.rate_limit.as_mut() {
                rl.max_requests_per_minute = rl.max_requests_per_minute.max(1);
            }
        }

        self.fetch.timeout_secs = self.fetch.timeout_secs.max(1);
        self.fetch.max_attempts = self.fetch.max_attempts.max(1);
        self.fetch.max_requests_per_minute = self.fetch.max_requests_per_minute.max(1);
        if self.fetch.user_agent.trim().is_empty() {
            self.fetch.user_agent = DEFAULT_USER_AGENT.to_string();
        }
        self.cache.ttl_secs = self.cache.ttl_secs.max(1);
        self.cache.cleanup_interval_secs = self.cache.cleanup_interval_secs.max(MIN_CLEANUP_INTERVAL_SECS);
        self.scheduler.interval_secs = self.scheduler.interval_secs.max(MIN_SCHEDULER_INTERVAL_SECS);
        if let Some(t) = self.runner.run_timeout_secs.as_mut() {
            *t = (*t).max(1);
        }
        Ok(self)
    }

    pub fn specs(&self) -> Vec<SourceSpec> {
        self.sources.iter().map(SourceEntry::to_spec).collect()
    }
}

/// Load config from an explicit path. Supports TOML or JSON formats.
pub fn load_from(path: &Path) -> Result<HarvestConfig> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading harvest config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing harvest config {}", path.display()))?
        .validated()
}

/// Load config using env var + fallbacks (see module docs).
pub fn load_default() -> Result<HarvestConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path {}", pb.display()));
    }
    let toml_p = PathBuf::from("config/harvest.toml");
    if toml_p.exists() {
        return load_from(&toml_p);
    }
    let json_p = PathBuf::from("config/harvest.json");
    if json_p.exists() {
        return load_from(&json_p);
    }
    Ok(HarvestConfig::default())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<HarvestConfig> {
    if hint_ext == "json" || s.trim_start().starts_with('{') {
        return serde_json::from_str(s).context("invalid json");
    }
    match toml::from_str(s) {
        Ok(v) => Ok(v),
        Err(toml_err) => serde_json::from_str(s).map_err(|_| anyhow!("unsupported config format: {toml_err}")),
    }
}
