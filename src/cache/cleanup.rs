// src/cache/cleanup.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::PersistentCache;

pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Owner of the background sweep. Call [`shutdown`](Self::shutdown) for a
/// graceful stop; dropping the handle aborts the task so a stray ticker
/// never keeps a test or short-lived process alive.
pub struct CleanupHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CleanupHandle {
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

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Sweep `cache` every `every` on the blocking pool. The first sweep runs
/// one full interval after spawning.
pub fn spawn_cleanup_task(cache: Arc<PersistentCache>, every: Duration) -> CleanupHandle {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {
                    let c = cache.clone();
                    match tokio::task::spawn_blocking(move || c.cleanup()).await {
                        Ok(removed) => {
                            tracing::debug!(target: "cache", removed, "scheduled cache cleanup");
                        }
                        Err(e) => {
                            tracing::warn!(target: "cache", error = %e, "cache cleanup task failed");
                        }
                    }
                }
            }
        }
        tracing::debug!(target: "cache", "cache cleanup task stopped");
    });

    CleanupHandle {
        stop: Some(stop_tx),
        task: Some(task),
    }
}
