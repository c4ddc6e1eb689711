use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Sliding-window limiter: at most `max_requests` acquisitions in any `interval`.
///
/// Waiting is done with `tokio::time`, so a paused test runtime acts as the clock.
/// Dropping an `acquire` future while it waits leaves no trace.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: NonZeroUsize,
    interval: Duration,
    granted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: NonZeroUsize, interval: Duration) -> Self {
        Self {
            max_requests,
            interval,
            granted: Mutex::new(VecDeque::with_capacity(max_requests.get())),
        }
    }

    /// How long a caller would have to wait right now.
    #[cfg(test)]
    async fn wait_time(&self) -> Duration {
        let mut granted = self.granted.lock().await;
        self.evict(&mut granted, Instant::now());
        self.delay(&granted, Instant::now())
    }

    pub async fn acquire(&self) {
        loop {
            let delay = {
                let mut granted = self.granted.lock().await;
                let now = Instant::now();
                self.evict(&mut granted, now);
                if granted.len() < self.max_requests.get() {
                    granted.push_back(now);
                    return;
                }
                self.delay(&granted, now)
            };
            tracing::debug!(wait_ms = delay.as_millis() as u64, "Waiting for provider rate limit");
            tokio::time::sleep(delay).await;
        }
    }

    fn evict(&self, granted: &mut VecDeque<Instant>, now: Instant) {
        while granted
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) >= self.interval)
        {
            granted.pop_front();
        }
    }

    fn delay(&self, granted: &VecDeque<Instant>, now: Instant) -> Duration {
        if granted.len() < self.max_requests.get() {
            return Duration::ZERO;
        }
        granted
            .front()
            .map(|oldest| (*oldest + self.interval).saturating_duration_since(now))
            .unwrap_or_default()
    }
}
