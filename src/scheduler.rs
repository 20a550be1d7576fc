// src/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::registry::SourceRegistry;

/// Periodic `health_check_all` driver. Dropping the handle aborts the loop.
pub struct SchedulerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop ticking. A health check already in flight is allowed to finish.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Run a full health check right away and then every `every`.
pub fn spawn_health_check_scheduler(registry: Arc<SourceRegistry>, every: Duration) -> SchedulerHandle {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {}
            }

            // Shutdown waits for the running check rather than cutting
            // sources off mid-fetch.
            let report = registry.health_check_all().await;
            gauge!("harvest_scheduler_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
            tracing::info!(
                target: "scheduler",
                succeeded = report.succeeded().len(),
                failed = report.failed().len(),
                disabled = report.stats.disabled,
                "scheduled health check tick"
            );
        }
        tracing::debug!(target: "scheduler", "health check scheduler stopped");
    });
    SchedulerHandle {
        stop: Some(stop_tx),
        task: Some(task),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::fetch::Transport;
    use crate::source::{adapter_fn, RawRecord, SourceConfig, SourceRunner};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

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

    #[tokio::test(start_paused = true)]
    async fn ticks_until_shutdown() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let adapter = adapter_fn(move |_ctx| {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(vec![RawRecord::new("Session", "2099-01-01")]) }
        });
        let registry = Arc::new(SourceRegistry::new());
        registry.register(
            "a",
            SourceRunner::new(SourceConfig::new("a", "A", "https://a.example"), Arc::new(adapter), Arc::new(Offline)),
        );

        let handle = spawn_health_check_scheduler(registry, Duration::from_secs(60));
        // immediate tick plus two more
        tokio::time::sleep(Duration::from_secs(125)).await;
        assert!(handle.is_running());
        handle.shutdown().await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
