//! Bounded retry with exponential backoff for storage operations

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;

/// How often and how patiently a failed storage operation is re-attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `on_retry` is called before every re-attempt. The last error is
    /// returned once the policy gives up.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F, mut on_retry: impl FnMut()) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 1;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_transient() || attempt >= self.max_attempts {
                return Err(err);
            }

            let delay = backoff.next_backoff().unwrap_or(self.max_backoff);
            warn!(
                operation = what,
                attempt = attempt,
                max_attempts = self.max_attempts,
                retry_in_ms = delay.as_millis() as u64,
                error = %err,
                "Storage operation failed, retrying"
            );
            on_retry();
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
