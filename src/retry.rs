//! Explicit retry/backoff policy, replacing the original's decorator-based
//! retry (`tenacity.retry` in the Python source).

use std::future::Future;
use std::time::Duration;

use crate::error::RunnerError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_ms: 500,
            max_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_ms.saturating_mul(1u64 << attempt.min(10));
        Duration::from_millis(exp.min(self.max_ms))
    }

    /// Runs `op` up to `max_attempts` times. Only retries when the returned
    /// error is `is_retryable()`; auth/schema/other errors surface
    /// immediately.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, RunnerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RunnerError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    tokio::time::sleep(self.backoff_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
