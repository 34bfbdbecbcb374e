//! Bounded retry for provider calls.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::providers::{Failure, ProviderError};

/// Retry configuration for provider operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    #[must_use]
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    /// Execute an async operation, retrying while it fails with
    /// [`Failure::Retryable`].
    ///
    /// # Errors
    /// Returns the cause of the first fatal failure, or of the last
    /// retryable failure once the attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut f: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Failure>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match f().await {
                Ok(result) => return Ok(result),
                Err(Failure::Fatal(e)) => return Err(e),
                Err(Failure::Retryable(e)) => {
                    if attempt >= max_attempts {
                        warn!(
                            operation = operation_name,
                            attempts = attempt,
                            error = %e,
                            "giving up after retryable failures"
                        );
                        return Err(e);
                    }

                    info!(
                        "{operation_name} failed (attempt {attempt}/{max_attempts}): {e}. Retrying in {:?}...",
                        self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}
