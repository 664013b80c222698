use rand::Rng;
use scholia_core::error::Retriable;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

const JITTER_MAX_MS: u64 = 250;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub tries: u32,
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            tries: 6,
            base: Duration::from_millis(500),
            max: Duration::from_millis(8_000),
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `i + 1`: `min(max, base * 2^i)` plus uniform
    /// jitter in [0, 250 ms].
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max);
        let jitter = rand::thread_rng().gen_range(0..=JITTER_MAX_MS);
        exp + Duration::from_millis(jitter)
    }
}

/// Retry `op` on retriable failures only; anything else propagates
/// immediately.
pub async fn with_retry<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    E: Retriable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let tries = policy.tries.max(1);
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() && attempt + 1 < tries => {
                let backoff = policy.backoff(attempt);
                warn!(attempt, backoff_ms = backoff.as_millis() as u64, %err, "retrying after transient failure");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
