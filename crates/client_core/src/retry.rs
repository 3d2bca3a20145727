use std::{future::Future, time::Duration};

use shared::{domain::ChannelId, error::ApiException};
use tracing::{info, warn};

use crate::error::FetchError;

pub const DEFAULT_RETRY_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_RETRY_INITIAL_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(8);

/// Bounded exponential backoff for a single channel's fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            initial_delay: DEFAULT_RETRY_INITIAL_DELAY,
            max_delay: DEFAULT_RETRY_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay slept after the failed attempt number `attempt` (1-based): `initial * 2^(attempt - 1)`,
    /// capped at `max_delay`.
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as u32;
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }

    /// Runs `operation` until it succeeds, the attempt ceiling is hit, or the remote rejects the
    /// request with a non-transient status.
    pub async fn run<T, F, Fut>(
        &self,
        channel_id: &ChannelId,
        operation_name: &'static str,
        mut operation: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            channel_id = %channel_id,
                            operation = operation_name,
                            attempt,
                            "retry: fetch recovered"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let permanent = is_permanent(&err);
                    if permanent || attempt >= max_attempts {
                        warn!(
                            channel_id = %channel_id,
                            operation = operation_name,
                            attempt,
                            permanent,
                            error = %err,
                            "retry: giving up"
                        );
                        return Err(FetchError {
                            channel_id: channel_id.clone(),
                            attempts: attempt,
                            cause: err,
                        });
                    }

                    let delay = self.delay_after(attempt);
                    warn!(
                        channel_id = %channel_id,
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retry: fetch failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn is_permanent(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<ApiException>())
        .any(|api| !api.code.is_transient())
}

#[cfg(test)]
#[path = "tests/retry_tests.rs"]
mod tests;
