//! Retry delays and per-slot request spacing.

use std::time::Duration;

use tokio::time::Instant;

use super::transport::{ErrorClass, TransportError};
use crate::config::EnrichmentConfig;

/// Exponential backoff with equal jitter.
///
/// Retry `n` (1-based) waits between half and all of
/// `min(max_backoff, backoff_base * 2^(n-1))`. Rate-limit responses wait at
/// least the server's `Retry-After`, or the rate-limit floor when absent.
/// `Retry-After` is clamped to `max_retry_after`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub retry_ceiling: u32,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
    pub rate_limit_backoff: Duration,
    pub max_retry_after: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EnrichmentConfig) -> Self {
        Self {
            retry_ceiling: config.retry_ceiling,
            backoff_base: config.backoff_base,
            max_backoff: config.max_backoff,
            rate_limit_backoff: config.rate_limit_backoff,
            max_retry_after: config.max_retry_after,
        }
    }

    /// Whether another retry is allowed after `retries` have been spent.
    pub fn can_retry(&self, retries: u32, error: &TransportError) -> bool {
        error.class() != ErrorClass::Permanent && retries < self.retry_ceiling
    }

    /// Upper bound of the delay before retry `retry`.
    pub fn ceiling_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// Delay before retry `retry` following `error`.
    pub fn delay_for(&self, retry: u32, error: &TransportError) -> Duration {
        let ceiling = self.ceiling_for(retry);
        let half = ceiling / 2;
        let spread = (ceiling - half).as_millis() as u64;
        let jittered = half + Duration::from_millis(fastrand::u64(0..=spread));

        match error {
            TransportError::RateLimited { retry_after } => {
                let hinted = retry_after
                    .map(|d| d.min(self.max_retry_after))
                    .unwrap_or(self.rate_limit_backoff);
                jittered.max(hinted)
            }
            _ => jittered,
        }
    }
}

/// Enforces a minimum interval between consecutive requests of one worker
/// slot. Owned by the slot, so no locking.
#[derive(Debug)]
pub(crate) struct SlotPacer {
    last_request: Option<Instant>,
    min_interval: Duration,
}

impl SlotPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_request: None,
            min_interval,
        }
    }

    /// Wait until the slot may issue its next request, then claim it.
    pub async fn wait(&mut self) {
        if let Some(last) = self.last_request {
            let ready = last + self.min_interval;
            if ready > Instant::now() {
                tracing::trace!("Pacing: waiting {:?}", ready - Instant::now());
                tokio::time::sleep_until(ready).await;
            }
        }
        self.last_request = Some(Instant::now());
    }
}
