//! Bounded retries for transient provider errors

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cloud::{ProviderError, ProviderErrorKind, ProviderResult};

/// Fibonacci backoff, capped.
///
/// Sequence for `new(500ms, 10s)`: 500ms, 500ms, 1s, 1.5s, 2.5s, 4s, 6.5s, 10s.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min: Duration,
    prev: Duration,
    current: Duration,
    max: Duration,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            prev: Duration::ZERO,
            current: min,
            max,
        }
    }

    /// Current delay; advances the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        let next = self.prev + self.current;
        self.prev = self.current;
        self.current = next.min(self.max);
        result
    }

    pub fn reset(&mut self) {
        self.prev = Duration::ZERO;
        self.current = self.min;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Limit on a single provider call
    pub call_timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay_ms: 500,
            max_delay_ms: 10_000,
            call_timeout_secs: 60,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn backoff(&self) -> FibonacciBackoff {
        FibonacciBackoff::new(
            Duration::from_millis(self.min_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// Run `call` until it succeeds, fails with a non-transient error, or the
/// policy runs out of attempts. An attempt that outlives the call timeout
/// counts as a transient `RequestTimeout`.
pub async fn retry_transient<T, F, Fut>(operation: &str, policy: &RetryPolicy, mut call: F) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let mut backoff = policy.backoff();
    let limit = policy.call_timeout();
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(limit, call()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::new(
                ProviderErrorKind::Transient,
                "RequestTimeout",
                format!("{} did not complete within {}s", operation, limit.as_secs()),
            )),
        };
        match result {
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = backoff.next_backoff();
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient provider error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
