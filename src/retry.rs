//! Retry with capped exponential backoff and jitter for external calls.
//!
//! Only errors that report themselves as transient (rate limits, 5xx,
//! timeouts) are retried. A server-supplied retry-after delay replaces the
//! computed backoff for that attempt.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Longest server-supplied delay that will be honored.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

/// Errors that can be retried by [`with_retry`].
pub trait RetryableError: std::fmt::Display {
    /// Whether the failure is worth another attempt.
    fn is_transient(&self) -> bool;

    /// Delay requested by the server, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// Build the error reported when one attempt exceeds its timeout.
    fn timed_out(after: Duration) -> Self;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
            call_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    fn delay_for<E: RetryableError>(&self, attempt: u32, error: &E) -> Duration {
        if let Some(hint) = error.retry_after() {
            return hint.min(MAX_RETRY_AFTER);
        }
        self.backoff(attempt) + random_jitter(self.jitter)
    }
}

/// Parse a `Retry-After` header value given in whole seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn random_jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let mut rng = rand::rng();
    Duration::from_secs_f64(rng.random_range(0.0..max.as_secs_f64()))
}

/// Run `op` until it succeeds, fails permanently, or retries run out.
/// Every attempt is bounded by `policy.call_timeout`.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: RetryableError,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        let result = match tokio::time::timeout(policy.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(policy.call_timeout)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt, &err);
                warn!(
                    call = label,
                    attempt,
                    max = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
