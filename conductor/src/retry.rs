//! Bounded retry with exponential backoff for collaborator calls.
//!
//! Transient failures (network, rate limits, a busy tracker) are retried a
//! few times; a persistent failure surfaces as [`RetryExhausted`] and the
//! caller decides whether it is fatal or just "not advanced this tick".

use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, warn};

use crate::io::config::RetryConfig;

/// Failure that persisted through every attempt.
#[derive(Debug, Error)]
#[error("{operation} failed after {attempts} attempt(s): {last_error}")]
pub struct RetryExhausted {
    pub operation: String,
    pub attempts: u32,
    pub last_error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): doubles each time, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            initial_backoff_ms: cfg.initial_backoff_ms,
            max_backoff_ms: cfg.max_backoff_ms,
        }
    }
}

/// Runs fallible operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct Retry {
    policy: RetryPolicy,
    sleep: fn(Duration),
}

impl Retry {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sleep: std::thread::sleep,
        }
    }

    /// Replace the sleeper (tests pass a no-op).
    pub fn with_sleeper(mut self, sleep: fn(Duration)) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Call `op` until it succeeds or the attempts run out.
    ///
    /// The error returned on exhaustion downcasts to [`RetryExhausted`].
    pub fn run<T>(&self, operation: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.policy.max_attempts => {
                    warn!(operation, attempts = attempt, err = %format!("{err:#}"), "retries exhausted");
                    return Err(RetryExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last_error: format!("{err:#}"),
                    }
                    .into());
                }
                Err(err) => {
                    let delay = self.policy.backoff(attempt);
                    debug!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        err = %format!("{err:#}"),
                        "transient failure, retrying"
                    );
                    (self.sleep)(delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::cell::Cell;

    fn no_sleep(_: Duration) {}

    fn retry(max_attempts: u32) -> Retry {
        Retry::new(RetryPolicy {
            max_attempts,
            initial_backoff_ms: 100,
            max_backoff_ms: 350,
        })
        .with_sleeper(no_sleep)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = retry(5).policy;
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(80), Duration::from_millis(350));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let value = retry(3)
            .run("list candidates", || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(anyhow!("rate limited"))
                } else {
                    Ok(7)
                }
            })
            .expect("third attempt succeeds");
        assert_eq!(value, 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhaustion_names_operation_and_attempts() {
        let calls = Cell::new(0);
        let err = retry(2)
            .run::<()>("review status", || {
                calls.set(calls.get() + 1);
                Err(anyhow!("timeout"))
            })
            .expect_err("always fails");
        assert_eq!(calls.get(), 2);
        let exhausted = err.downcast_ref::<RetryExhausted>().expect("typed error");
        assert_eq!(exhausted.operation, "review status");
        assert_eq!(exhausted.attempts, 2);
        assert_eq!(
            err.to_string(),
            "review status failed after 2 attempt(s): timeout"
        );
    }
}
