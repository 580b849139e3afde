//! Bounded retry with exponential backoff and jitter

use super::RateLimiter;
use crate::error::FetchError;
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// How often and how patiently transient fetch failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Permanent failures are never retried.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Capped exponential delay before retry number `retry` (zero-based),
    /// before jitter.
    pub fn backoff_ceiling(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Jittered delay in `[ceiling / 2, ceiling]`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let ceiling = self.backoff_ceiling(retry);
        let floor = ceiling / 2;
        let span = (ceiling - floor).as_nanos() as u64;
        floor + Duration::from_nanos(rand::thread_rng().gen_range(0..=span))
    }

    /// Run `op` until it succeeds, fails permanently, or the attempts run out.
    ///
    /// Every attempt first waits on `limiter`. Returns the number of attempts
    /// made alongside the final result.
    pub async fn run<T, F, Fut, L>(
        &self,
        limiter: &RateLimiter,
        label: &L,
        mut op: F,
    ) -> (u32, Result<T, FetchError>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
        L: fmt::Display + ?Sized,
    {
        let mut attempts = 0;
        loop {
            limiter.acquire().await;
            attempts += 1;
            match op().await {
                Ok(value) => return (attempts, Ok(value)),
                Err(err) if err.is_transient() && attempts <= self.max_retries => {
                    let delay = self.delay_for(attempts - 1);
                    log::debug!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        label,
                        attempts,
                        self.max_attempts(),
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return (attempts, Err(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = policy(10);
        assert_eq!(policy.backoff_ceiling(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_ceiling(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_ceiling(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_ceiling(3), Duration::from_millis(500));
        assert_eq!(policy.backoff_ceiling(40), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = policy(10);
        for retry in 0..6 {
            let ceiling = policy.backoff_ceiling(retry);
            for _ in 0..50 {
                let delay = policy.delay_for(retry);
                assert!(delay >= ceiling / 2 && delay <= ceiling, "{:?}", delay);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_exhaust_attempts() {
        let limiter = RateLimiter::new(1000.0, 1);
        let calls = &AtomicU32::new(0);
        let (attempts, result) = policy(3)
            .run(&limiter, "pokemon/1", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(FetchError::transient("reset"))
            })
            .await;

        assert_eq!(attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(result.unwrap_err().is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_not_retried() {
        let limiter = RateLimiter::new(1000.0, 1);
        let (attempts, result) = policy(3)
            .run(&limiter, "pokemon/1", || async {
                Err::<(), _>(FetchError::Permanent {
                    status: Some(404),
                    message: "not found".into(),
                })
            })
            .await;

        assert_eq!(attempts, 1);
        assert_eq!(result.unwrap_err().status(), Some(404));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let limiter = RateLimiter::new(1000.0, 1);
        let calls = &AtomicU32::new(0);
        let (attempts, result) = policy(3)
            .run(&limiter, "move/tackle", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FetchError::transient("503"))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(attempts, 3);
        assert_eq!(result, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_means_single_attempt() {
        let limiter = RateLimiter::new(1000.0, 1);
        let (attempts, _) = policy(0)
            .run(&limiter, "type/fire", || async {
                Err::<(), _>(FetchError::transient("timeout"))
            })
            .await;
        assert_eq!(attempts, 1);
    }
}
