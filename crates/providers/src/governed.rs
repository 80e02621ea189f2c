//! Governed provider: rate ceiling, bounded retry, and per-call timeout.
//!
//! Every call to the reasoning-policy service (REASON steps and context
//! distillation alike) goes through one of these wrappers. Wrappers that
//! share a [`RateLimiter`] share one ceiling.

use async_trait::async_trait;
use quarry_core::error::ProviderError;
use quarry_core::provider::*;
use quarry_core::RetryPolicy;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Spaces calls at least `min_interval` apart.
///
/// Callers reserve the next free slot under a short lock and sleep outside
/// it, so concurrent callers queue up in reservation order.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// A limiter that never waits.
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Wait until this caller's slot comes up.
    pub async fn acquire(&self) {
        let wait = {
            let mut next = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let slot = next.map_or(now, |n| n.max(now));
            *next = Some(slot + self.min_interval);
            slot.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "Rate ceiling reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

/// A provider wrapped with the external-call governor.
pub struct GovernedProvider {
    inner: Arc<dyn quarry_core::Provider>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl GovernedProvider {
    /// Wrap `inner` with its own limiter, default retry, and a 60s timeout.
    pub fn new(inner: Arc<dyn quarry_core::Provider>) -> Self {
        Self {
            inner,
            limiter: Arc::new(RateLimiter::unlimited()),
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Share a rate ceiling with other governed providers.
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn attempt(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.limiter.acquire().await;

        match tokio::time::timeout(self.timeout, self.inner.complete(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    provider = %self.inner.name(),
                    timeout_secs = self.timeout.as_secs(),
                    "Provider call timed out"
                );
                Err(ProviderError::Timeout(format!(
                    "Provider '{}' timed out after {}s",
                    self.inner.name(),
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

#[async_trait]
impl quarry_core::Provider for GovernedProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        self.retry
            .run_with_hint(
                |_| self.attempt(request.clone()),
                ProviderError::is_transient,
                ProviderError::retry_after,
            )
            .await
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}
