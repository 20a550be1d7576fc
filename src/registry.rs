// src/registry.rs
//! All runners by key, operator toggles, aggregate health and fan-out runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::Duration;
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::error::SourceError;
use crate::fetch::Transport;
use crate::source::{NormalizedEvent, SourceHealth, SourceRunner, SourceSpec};

/// Window used for "recent" success counts.
const RECENT_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
    /// Sources whose last success is within the last 24h.
    pub recent_successes: usize,
    /// Sources currently carrying at least one consecutive failure.
    pub recent_failures: usize,
}

/// How one source fared in a fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded { events: usize },
    Failed { error: String },
    /// The run task itself died outside the adapter (abort or runtime shutdown).
    Crashed { error: String },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckReport {
    pub outcomes: BTreeMap<String, RunOutcome>,
    pub stats: AggregateStats,
}

impl HealthCheckReport {
    pub fn succeeded(&self) -> Vec<&str> {
        self.filter_keys(true)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.filter_keys(false)
    }

    fn filter_keys(&self, success: bool) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_success() == success)
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

pub struct SourceRegistry {
    runners: RwLock<HashMap<String, Arc<SourceRunner>>>,
    clock: Arc<dyn Clock>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("keys", &self.list_keys())
            .finish_non_exhaustive()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            runners: RwLock::new(HashMap::new()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build a registry from `(config, adapter)` data. `configure` gets each
    /// fresh runner to attach cache, clock, timeouts and the like.
    pub fn from_specs<I, F>(specs: I, transport: Arc<dyn Transport>, configure: F) -> Self
    where
        I: IntoIterator<Item = SourceSpec>,
        F: Fn(SourceRunner) -> SourceRunner,
    {
        let registry = Self::new();
        for spec in specs {
            let key = spec.config.key.clone();
            let runner = configure(SourceRunner::new(spec.config, spec.adapter, transport.clone()));
            registry.register(key, runner);
        }
        registry
    }

    /// Register (or hot-replace) the runner for `key`.
    pub fn register(&self, key: impl Into<String>, runner: SourceRunner) {
        let key = key.into();
        let mut map = self.runners.write().expect("registry lock poisoned");
        if map.insert(key.clone(), Arc::new(runner)).is_some() {
            tracing::warn!(target: "registry", source = %key, "source re-registered; previous runner replaced");
        } else {
            tracing::debug!(target: "registry", source = %key, "source registered");
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<SourceRunner>> {
        self.runners.read().expect("registry lock poisoned").get(key).cloned()
    }

    pub fn enable(&self, key: &str) -> bool {
        self.with_runner(key, |r| r.set_enabled(true))
    }

    pub fn disable(&self, key: &str) -> bool {
        self.with_runner(key, |r| r.set_enabled(false))
    }

    pub fn reset_health(&self, key: &str) -> bool {
        self.with_runner(key, SourceRunner::reset_health)
    }

    pub fn list_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.runners.read().expect("registry lock poisoned").keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.runners.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all_health(&self) -> BTreeMap<String, SourceHealth> {
        self.snapshot()
            .into_iter()
            .map(|(k, r)| (k, r.health()))
            .collect()
    }

    pub fn aggregate_stats(&self) -> AggregateStats {
        let since = self.clock.now() - Duration::hours(RECENT_WINDOW_HOURS);
        let mut stats = AggregateStats::default();
        for health in self.all_health().values() {
            stats.total += 1;
            if health.enabled {
                stats.enabled += 1;
            } else {
                stats.disabled += 1;
            }
            if health.last_success.is_some_and(|t| t >= since) {
                stats.recent_successes += 1;
            }
            if health.consecutive_failures > 0 {
                stats.recent_failures += 1;
            }
        }
        stats
    }

    /// Run a single source.
    pub async fn run(&self, key: &str) -> Result<Vec<NormalizedEvent>, SourceError> {
        let runner = self.get(key).ok_or_else(|| SourceError::UnknownSource(key.to_string()))?;
        runner.run().await
    }

    /// Run every registered source concurrently and hand back each result.
    /// Disabled sources come back as empty successes.
    pub async fn run_all(&self) -> BTreeMap<String, Result<Vec<NormalizedEvent>, SourceError>> {
        self.fan_out(false)
            .await
            .into_iter()
            .map(|(key, joined)| {
                let result = match joined {
                    Ok(r) => r,
                    Err(e) => Err(SourceError::adapter(format!("run task crashed: {e}"))),
                };
                (key, result)
            })
            .collect()
    }

    /// Run every enabled source concurrently, wait for all of them, then
    /// report per-source outcomes plus fresh aggregate stats.
    pub async fn health_check_all(&self) -> HealthCheckReport {
        let outcomes: BTreeMap<String, RunOutcome> = self
            .fan_out(true)
            .await
            .into_iter()
            .map(|(key, joined)| {
                let outcome = match joined {
                    Ok(Ok(events)) => RunOutcome::Succeeded { events: events.len() },
                    Ok(Err(e)) => RunOutcome::Failed { error: e.to_string() },
                    Err(e) => RunOutcome::Crashed { error: e.to_string() },
                };
                (key, outcome)
            })
            .collect();

        let stats = self.aggregate_stats();
        let failed = outcomes.values().filter(|o| !o.is_success()).count();
        tracing::info!(
            target: "registry",
            checked = outcomes.len(),
            failed,
            enabled = stats.enabled,
            disabled = stats.disabled,
            "health check finished"
        );
        HealthCheckReport { outcomes, stats }
    }

    /// One task per runner; settle-all join so a failing or panicking
    /// source never cancels the others.
    async fn fan_out(
        &self,
        only_enabled: bool,
    ) -> Vec<(String, Result<Result<Vec<NormalizedEvent>, SourceError>, tokio::task::JoinError>)> {
        let handles: Vec<_> = self
            .snapshot()
            .into_iter()
            .filter(|(_, r)| !only_enabled || r.is_enabled())
            .map(|(key, runner)| (key, tokio::spawn(async move { runner.run().await })))
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (key, handle) in handles {
            let joined = handle.await;
            if let Err(e) = &joined {
                tracing::error!(target: "registry", source = %key, error = %e, "source run task crashed");
            }
            results.push((key, joined));
        }
        results
    }

    fn snapshot(&self) -> Vec<(String, Arc<SourceRunner>)> {
        let map = self.runners.read().expect("registry lock poisoned");
        let mut v: Vec<_> = map.iter().map(|(k, r)| (k.clone(), r.clone())).collect();
        v.sort_by(|a, b| a.0.cmp(&b.0));
        v
    }

    fn with_runner(&self, key: &str, f: impl FnOnce(&SourceRunner)) -> bool {
        match self.get(key) {
            Some(r) => {
                f(&r);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::TransportError;
    use crate::source::{adapter_fn, RawRecord, SourceConfig};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    struct Offline;

    #[async_trait]
    impl Transport for Offline {
        async fn get_text(&self, url: &str) -> Result<String, TransportError> {
            Err(TransportError::Network {
                url: url.into(),
                message: "offline".into(),
            })
        }
    }

    fn ok_runner(key: &str) -> SourceRunner {
        let adapter = adapter_fn(|_ctx| async { Ok(vec![RawRecord::new("Session", "2099-01-01")]) });
        SourceRunner::new(SourceConfig::new(key, key, "https://x.example"), Arc::new(adapter), Arc::new(Offline))
    }

    #[test]
    fn toggles_report_unknown_keys() {
        let reg = SourceRegistry::new();
        reg.register("a", ok_runner("a"));
        assert!(reg.disable("a"));
        assert!(!reg.get("a").unwrap().is_enabled());
        assert!(reg.enable("a"));
        assert!(!reg.enable("nope"));
        assert!(!reg.disable("nope"));
        assert!(!reg.reset_health("nope"));
    }

    #[test]
    fn keys_are_sorted_and_reregistration_replaces() {
        let reg = SourceRegistry::new();
        reg.register("zeta", ok_runner("zeta"));
        reg.register("alpha", ok_runner("alpha"));
        reg.register("alpha", ok_runner("alpha"));
        assert_eq!(reg.list_keys(), vec!["alpha".to_string(), "zeta".to_string()]);
        assert_eq!(reg.len(), 2);
    }

    #[tokio::test]
    async fn unknown_source_run_is_an_error() {
        let reg = SourceRegistry::new();
        assert!(matches!(reg.run("ghost").await, Err(SourceError::UnknownSource(_))));
    }

    #[tokio::test]
    async fn aggregate_stats_counts_recent_successes_against_the_clock() {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
        let reg = SourceRegistry::new().with_clock(clock.clone());
        reg.register("a", ok_runner("a").with_clock(clock.clone()));
        reg.register("b", ok_runner("b").with_clock(clock.clone()));
        reg.disable("b");

        reg.run("a").await.unwrap();
        let s = reg.aggregate_stats();
        assert_eq!(
            s,
            AggregateStats {
                total: 2,
                enabled: 1,
                disabled: 1,
                recent_successes: 1,
                recent_failures: 0
            }
        );

        clock.advance(Duration::hours(25));
        assert_eq!(reg.aggregate_stats().recent_successes, 0);
    }

    #[tokio::test]
    async fn run_all_includes_disabled_sources_as_empty() {
        let reg = SourceRegistry::new();
        reg.register("a", ok_runner("a"));
        reg.register("b", ok_runner("b"));
        reg.disable("b");
        let all = reg.run_all().await;
        assert_eq!(all["a"].as_ref().unwrap().len(), 1);
        assert!(all["b"].as_ref().unwrap().is_empty());
    }
}
