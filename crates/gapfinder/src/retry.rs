//! Bounded retries with exponential backoff.

use std::future::Future;
use std::time::Duration;

/// How many times to retry and how long to wait before the first retry.
/// Each further retry doubles the delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, 0)
    }

    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base…
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }
}

/// Runs `op` until it succeeds, fails with an error `should_retry` rejects,
/// or the policy's retries are used up. Returns the last error.
pub async fn retry_async<T, E, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
    should_retry: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries && should_retry(&e) => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                log::info!(
                    "Retrying {} (attempt {}/{}) after {}ms: {}",
                    label,
                    attempt + 1,
                    policy.max_retries + 1,
                    delay.as_millis(),
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
