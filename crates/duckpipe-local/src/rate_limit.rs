use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(2_000);

/// Single-lane pacing for every request the tools send upstream.
///
/// Callers reserve a send slot under the lock (`max(now, last + min_interval)`) and then
/// sleep outside it, so concurrent invocations queue behind each other instead of all
/// reading the same stale timestamp.
#[derive(Debug)]
pub struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Timestamp of the most recently reserved request slot.
    pub fn last_request(&self) -> Option<Instant> {
        *self.last_request.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reserve(&self, now: Instant) -> Instant {
        let mut last = self.last_request.lock().unwrap_or_else(|e| e.into_inner());
        let slot = match *last {
            // `duration_since` saturates to zero when `prev` is a slot still in the future.
            Some(prev) if now.duration_since(prev) < self.min_interval => {
                prev + self.min_interval
            }
            _ => now,
        };
        *last = Some(slot);
        slot
    }

    /// Delay the caller until at least `min_interval` has passed since the previous request.
    pub async fn wait_if_needed(&self) {
        let now = Instant::now();
        let slot = self.reserve(now);
        if slot > now {
            tracing::debug!(
                wait_ms = (slot - now).as_millis() as u64,
                "rate limit: delaying request"
            );
            tokio::time::sleep_until(slot).await;
        }
    }
}
