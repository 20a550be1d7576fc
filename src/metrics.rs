// src/metrics.rs
use anyhow::Context;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("harvest_runs_total", "Source runs started (per source).");
        describe_counter!(
            "harvest_run_failures_total",
            "Source runs that ended in the failure path."
        );
        describe_counter!(
            "harvest_events_total",
            "Normalized events returned by successful runs."
        );
        describe_counter!(
            "harvest_records_dropped_total",
            "Raw records rejected by the transformer."
        );
        describe_counter!(
            "harvest_circuit_open_total",
            "Times a source disabled itself after repeated failures."
        );
        describe_histogram!("harvest_run_ms", "Source run wall time in milliseconds.");
        describe_counter!("cache_hits_total", "Cache reads that returned a valid entry.");
        describe_counter!(
            "cache_misses_total",
            "Cache reads that found nothing usable."
        );
        describe_counter!(
            "cache_integrity_failures_total",
            "Cache entries rejected for a bad signature."
        );
        describe_counter!(
            "cache_cleanup_removed_total",
            "Entries removed by cache sweeps."
        );
        describe_counter!("fetch_attempts_total", "Outbound fetch attempts.");
        describe_counter!("fetch_retries_total", "Fetch attempts that were retried.");
        describe_counter!(
            "ratelimit_waits_total",
            "Requests that had to wait for a new rate-limit window."
        );
        describe_gauge!(
            "harvest_scheduler_last_run_ts",
            "Unix ts when the scheduled health check last finished."
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Fails if a recorder is
    /// already installed in this process.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}
