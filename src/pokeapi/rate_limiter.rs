//! Shared request pacing

use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Token-bucket style limiter shared by every fetch worker of a run.
///
/// Implemented as a generic cell rate algorithm: the limiter keeps the
/// theoretical arrival time of the next request and admits a caller once
/// `now >= tat - tolerance`. Over any one-second window at most
/// `rps + burst - 1` requests are admitted.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    tolerance: Duration,
    tat: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter admitting `rps` requests per second with up to
    /// `burst` back-to-back requests after an idle period.
    ///
    /// `burst` is allowance on top of the steady rate: with `burst > 1` a
    /// one-second window may hold up to `rps + burst - 1` requests, and only
    /// `burst = 1` keeps every window at `rps` or fewer.
    ///
    /// `rps` must be finite and positive; the run configuration checks this.
    pub fn new(rps: f64, burst: u32) -> Self {
        // Round up so integer rates never admit one extra request per window
        let nanos = (1e9 / rps).ceil().max(1.0) as u64;
        let interval = Duration::from_nanos(nanos);
        Self {
            interval,
            tolerance: interval * burst.saturating_sub(1),
            tat: Mutex::new(None),
        }
    }

    /// Spacing between requests at the steady rate.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until a request may be issued.
    ///
    /// Callers are admitted in the order they reserve a slot. A caller that is
    /// dropped while waiting still consumes its slot.
    pub async fn acquire(&self) {
        let admit_at = {
            let mut tat = self.tat.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            let current = tat.map_or(now, |t| t.max(now));
            let admit_at = current
                .checked_sub(self.tolerance)
                .map_or(now, |t| t.max(now));
            *tat = Some(current + self.interval);
            admit_at
        };

        if admit_at > Instant::now() {
            tokio::time::sleep_until(admit_at).await;
        }
    }
}
