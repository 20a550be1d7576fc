// src/fetch/rate_limit.rs
use std::time::Duration;

use metrics::counter;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const DEFAULT_MAX_REQUESTS_PER_MINUTE: u32 = 30;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Resetting-window limiter: at most `max_per_window` requests per window.
///
/// An exhausted window suspends callers until it ends; the counter then
/// restarts from zero. Waiters are served in lock order (roughly FIFO).
#[derive(Debug)]
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    delay: Duration,
    state: Mutex<WindowState>,
}

#[derive(Debug)]
struct WindowState {
    started: Instant,
    count: u32,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window: max_per_window.max(1),
            window,
            delay: Duration::ZERO,
            state: Mutex::new(WindowState {
                started: Instant::now(),
                count: 0,
            }),
        }
    }

    pub fn per_minute(max_requests_per_minute: u32) -> Self {
        Self::new(max_requests_per_minute, DEFAULT_WINDOW)
    }

    /// Fixed pause applied after every request, independent of the window.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_per_window(&self) -> u32 {
        self.max_per_window
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Wait for a slot in the current window.
    pub async fn acquire(&self) {
        let mut st = self.state.lock().await;

        let now = Instant::now();
        if now.duration_since(st.started) >= self.window {
            st.started = now;
            st.count = 0;
        }

        if st.count >= self.max_per_window {
            let resume_at = st.started + self.window;
            counter!("ratelimit_waits_total").increment(1);
            tracing::debug!(
                target: "fetch",
                wait_ms = resume_at.saturating_duration_since(now).as_millis() as u64,
                "rate limit window exhausted; waiting"
            );
            tokio::time::sleep_until(resume_at).await;
            st.started = Instant::now();
            st.count = 0;
        }

        st.count += 1;
    }

    /// Apply the post-request delay, if any.
    pub async fn pace(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::per_minute(DEFAULT_MAX_REQUESTS_PER_MINUTE)
    }
}
