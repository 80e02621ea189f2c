//! Bounded retry with exponential backoff.
//!
//! Shared by the reasoning-policy governor and the capability dispatcher:
//! transient failures are retried up to `max_retries` times, sleeping
//! `base_delay * 2^attempt` (capped at `max_delay`) between attempts.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u32 << exponent;
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    ///
    /// `op` receives the 0-based attempt number. Errors for which
    /// `is_transient` returns false are returned immediately.
    pub async fn run<T, E, F, Fut>(&self, op: F, is_transient: impl Fn(&E) -> bool) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run_with_hint(op, is_transient, |_| None).await
    }

    /// Like [`run`](Self::run), but an error may name its own minimum wait
    /// (e.g. a provider's `Retry-After`). The sleep is the larger of that
    /// hint and the backoff.
    pub async fn run_with_hint<T, E, F, Fut>(
        &self,
        mut op: F,
        is_transient: impl Fn(&E) -> bool,
        retry_after: impl Fn(&E) -> Option<Duration>,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && is_transient(&e) => {
                    let backoff = self.backoff(attempt);
                    let delay = retry_after(&e).map_or(backoff, |hint| hint.max(backoff));
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(6, Duration::from_millis(500), Duration::from_secs(30))
    }
}
