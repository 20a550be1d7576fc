// src/context.rs
//! Everything a host process needs, wired from one [`HarvestConfig`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::cache::{spawn_cleanup_task, CleanupHandle, PersistentCache};
use crate::config::HarvestConfig;
use crate::fetch::{RateLimiter, ReqwestTransport, Transport};
use crate::registry::SourceRegistry;

pub struct HarvestContext {
    pub registry: Arc<SourceRegistry>,
    pub cache: Arc<PersistentCache>,
    cleanup: Option<CleanupHandle>,
}

impl HarvestContext {
    /// Build over the production reqwest transport.
    pub fn from_config(cfg: &HarvestConfig) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(&cfg.fetch.user_agent)?;
        Self::with_transport(cfg, Arc::new(transport))
    }

    /// Open the cache, start its sweeper, and register every configured
    /// source. Must be called inside a Tokio runtime.
    pub fn with_transport(cfg: &HarvestConfig, transport: Arc<dyn Transport>) -> anyhow::Result<Self> {
        let cache = Arc::new(
            PersistentCache::open_with_env_secret(&cfg.cache.dir)
                .with_context(|| format!("opening cache dir {}", cfg.cache.dir.display()))?,
        );
        let ttl = Duration::from_secs(cfg.cache.ttl_secs);
        let settings = cfg.fetch.settings();
        let default_rpm = cfg.fetch.max_requests_per_minute;
        let run_timeout = cfg.runner.run_timeout();

        let registry = SourceRegistry::from_specs(cfg.specs(), transport, |runner| {
            let mut runner = runner.with_fetch_settings(settings).with_cache(cache.clone(), ttl);
            if runner.config().rate_limit.is_none() {
                runner = runner.with_rate_limiter(Arc::new(RateLimiter::per_minute(default_rpm)));
            }
            if let Some(limit) = run_timeout {
                runner = runner.with_run_timeout(limit);
            }
            runner
        });
        tracing::info!(target: "registry", sources = registry.len(), cache_dir = %cfg.cache.dir.display(), "harvest context ready");

        let cleanup = spawn_cleanup_task(cache.clone(), Duration::from_secs(cfg.cache.cleanup_interval_secs));
        Ok(Self {
            registry: Arc::new(registry),
            cache,
            cleanup: Some(cleanup),
        })
    }

    /// Stop the cache sweeper and wait for it.
    pub async fn shutdown(mut self) {
        if let Some(c) = self.cleanup.take() {
            c.shutdown().await;
        }
    }
}
