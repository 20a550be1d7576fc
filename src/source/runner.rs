// src/source/runner.rs
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use futures::FutureExt;
use metrics::{counter, histogram};

use crate::cache::PersistentCache;
use crate::clock::{Clock, SystemClock};
use crate::error::SourceError;
use crate::fetch::{FetchSettings, RateLimiter, RetryingFetcher, Transport};
use crate::source::{AdapterContext, NormalizedEvent, RawRecord, SourceAdapter, SourceConfig, SourceHealth};
use crate::transform::{DefaultTransformer, EventTransformer};

/// Consecutive failed runs after which a source disables itself.
pub const FAILURE_THRESHOLD: u32 = 3;

/// Owns one adapter's lifecycle: gate, fetch, transform, filter, health.
pub struct SourceRunner {
    config: Arc<SourceConfig>,
    adapter: Arc<dyn SourceAdapter>,
    fetcher: RetryingFetcher,
    transformer: Arc<dyn EventTransformer>,
    clock: Arc<dyn Clock>,
    cache: Option<(Arc<PersistentCache>, Duration)>,
    run_timeout: Option<Duration>,
    health: Mutex<SourceHealth>,
}

impl std::fmt::Debug for SourceRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRunner")
            .field("key", &self.config.key)
            .field("run_timeout", &self.run_timeout)
            .field("cached", &self.cache.is_some())
            .field("health", &self.health())
            .finish_non_exhaustive()
    }
}

impl SourceRunner {
    /// Runner with default fetch settings, the source's own rate limit
    /// (or 30 req/min), the default transformer and the system clock.
    pub fn new(config: SourceConfig, adapter: Arc<dyn SourceAdapter>, transport: Arc<dyn Transport>) -> Self {
        crate::metrics::ensure_metrics_described();
        let limiter = match config.rate_limit {
            Some(rl) => RateLimiter::per_minute(rl.max_requests_per_minute)
                .with_delay(Duration::from_millis(rl.delay_ms)),
            None => RateLimiter::default(),
        };
        let fetcher = RetryingFetcher::new(transport, Arc::new(limiter), FetchSettings::default());
        Self {
            config: Arc::new(config),
            adapter,
            fetcher,
            transformer: Arc::new(DefaultTransformer::new()),
            clock: Arc::new(SystemClock),
            cache: None,
            run_timeout: None,
            health: Mutex::new(SourceHealth::default()),
        }
    }

    pub fn with_fetch_settings(mut self, settings: FetchSettings) -> Self {
        self.fetcher = self.fetcher.with_settings(settings);
        self
    }

    /// Share a limiter between runners that hit the same host.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.fetcher = self.fetcher.with_limiter(limiter);
        self
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn EventTransformer>) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Cache adapter output for `ttl`. A fresh entry skips the adapter entirely.
    pub fn with_cache(mut self, cache: Arc<PersistentCache>, ttl: Duration) -> Self {
        self.cache = Some((cache, ttl));
        self
    }

    /// Bound a whole adapter invocation; in-flight fetches are cancelled on expiry.
    pub fn with_run_timeout(mut self, limit: Duration) -> Self {
        self.run_timeout = Some(limit);
        self
    }

    pub fn key(&self) -> &str {
        &self.config.key
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn health(&self) -> SourceHealth {
        self.health.lock().expect("health mutex poisoned").clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.health.lock().expect("health mutex poisoned").enabled
    }

    /// Operator override; leaves the failure counter alone.
    pub fn set_enabled(&self, enabled: bool) {
        let mut h = self.health.lock().expect("health mutex poisoned");
        h.enabled = enabled;
        tracing::info!(target: "runner", source = %self.config.key, enabled, "source toggled");
    }

    /// Clear failures and the last error, and re-enable.
    pub fn reset_health(&self) {
        let mut h = self.health.lock().expect("health mutex poisoned");
        h.consecutive_failures = 0;
        h.last_error = None;
        h.enabled = true;
        tracing::info!(target: "runner", source = %self.config.key, "source health reset");
    }

    /// Run the source once.
    ///
    /// A disabled source is a no-op returning `Ok(vec![])`. An `Err` means
    /// the run itself failed (records that merely fail to transform are
    /// dropped, not errors).
    pub async fn run(&self) -> Result<Vec<NormalizedEvent>, SourceError> {
        if !self.is_enabled() {
            tracing::debug!(target: "runner", source = %self.config.key, "source disabled; skipping");
            return Ok(Vec::new());
        }

        let key = self.config.key.clone();
        self.health.lock().expect("health mutex poisoned").last_attempt = Some(self.clock.now());
        counter!("harvest_runs_total", "source" => key.clone()).increment(1);
        let t0 = Instant::now();

        let outcome = self.collect_records().await;
        histogram!("harvest_run_ms", "source" => key.clone()).record(t0.elapsed().as_secs_f64() * 1_000.0);

        match outcome {
            Ok(records) => {
                let now = self.clock.now();
                let fetched = records.len();
                let events = self.transform_and_filter(records, now.date_naive());

                {
                    let mut h = self.health.lock().expect("health mutex poisoned");
                    h.last_success = Some(now);
                    h.consecutive_failures = 0;
                    h.last_error = None;
                    h.events_produced = events.len();
                }
                counter!("harvest_events_total", "source" => key.clone()).increment(events.len() as u64);
                tracing::info!(
                    target: "runner",
                    source = %key,
                    fetched,
                    kept = events.len(),
                    "source run succeeded"
                );
                Ok(events)
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    async fn collect_records(&self) -> Result<Vec<RawRecord>, SourceError> {
        let cache_key = self.cache_key();
        if let Some((cache, _)) = &self.cache {
            if let Some(records) = cache.get::<Vec<RawRecord>>(&cache_key) {
                tracing::debug!(target: "runner", source = %self.config.key, "serving records from cache");
                return Ok(records);
            }
        }

        let ctx = AdapterContext {
            fetcher: self.fetcher.clone(),
            config: self.config.clone(),
        };
        // A panicking adapter is a failed run like any other.
        let fetch = AssertUnwindSafe(self.adapter.fetch_records(ctx))
            .catch_unwind()
            .map(|joined| joined.unwrap_or_else(|payload| Err(SourceError::adapter(panic_message(payload)))));
        let records = match self.run_timeout {
            // Dropping the adapter future cancels whatever fetch is in flight.
            Some(limit) => tokio::time::timeout(limit, fetch)
                .await
                .map_err(|_| SourceError::RunTimeout(limit))??,
            None => fetch.await?,
        };

        if let Some((cache, ttl)) = &self.cache {
            cache.set(&cache_key, &records, *ttl);
        }
        Ok(records)
    }

    /// Transform every record, dropping failures and events dated before `today`.
    fn transform_and_filter(&self, records: Vec<RawRecord>, today: NaiveDate) -> Vec<NormalizedEvent> {
        let mut events = Vec::with_capacity(records.len());
        let mut dropped = 0u64;
        for record in records {
            match self.transformer.transform(record, &self.config) {
                Ok(Some(ev)) if ev.date >= today => events.push(ev),
                Ok(_) => dropped += 1,
                Err(e) => {
                    dropped += 1;
                    tracing::warn!(target: "runner", source = %self.config.key, error = %e, "dropping record");
                }
            }
        }
        if dropped > 0 {
            counter!("harvest_records_dropped_total", "source" => self.config.key.clone()).increment(dropped);
        }
        events
    }

    fn record_failure(&self, err: &SourceError) {
        let mut h = self.health.lock().expect("health mutex poisoned");
        h.consecutive_failures = h.consecutive_failures.saturating_add(1);
        h.last_error = Some(err.to_string());
        counter!("harvest_run_failures_total", "source" => self.config.key.clone()).increment(1);

        if h.consecutive_failures >= FAILURE_THRESHOLD && h.enabled {
            h.enabled = false;
            counter!("harvest_circuit_open_total", "source" => self.config.key.clone()).increment(1);
            tracing::warn!(
                target: "runner",
                source = %self.config.key,
                failures = h.consecutive_failures,
                error = %err,
                "source auto-disabled after consecutive failures"
            );
        } else {
            tracing::warn!(
                target: "runner",
                source = %self.config.key,
                failures = h.consecutive_failures,
                error = %err,
                "source run failed"
            );
        }
    }

    fn cache_key(&self) -> String {
        format!("source-records_{}", self.config.key)
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string payload".to_string());
    format!("adapter panicked: {detail}")
}
