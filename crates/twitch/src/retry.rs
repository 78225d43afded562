use std::{future::Future, time::Duration};

use thiserror::Error;
use tracing::warn;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Exponential backoff: the delay before retry `n` (1-based) is
/// `base_delay * 2^(n-1)`. `max_retries` counts retries, so an operation runs
/// at most `max_retries + 1` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay to wait before the given retry (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Runs `operation` until it succeeds or the retries are used up.
    pub async fn run<F, Fut, T, E>(
        &self,
        name: &'static str,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let mut retry = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if retry < self.max_retries => {
                    retry += 1;
                    let delay = self.delay_for(retry);
                    warn!(
                        stage = "twitch",
                        operation = name,
                        retry,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "remote call failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(RetryError {
                        operation: name,
                        attempts: retry + 1,
                        last: err,
                    })
                }
            }
        }
    }
}

/// Raised once every attempt of a retried operation has failed.
#[derive(Debug, Error)]
#[error("{operation} failed after {attempts} attempts: {last}")]
pub struct RetryError<E>
where
    E: std::error::Error + 'static,
{
    pub operation: &'static str,
    pub attempts: u32,
    #[source]
    pub last: E,
}
