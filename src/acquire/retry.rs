//! Bounded retry for the exchange call.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::AcquireError;

/// Delays slept between consecutive attempts.
pub const DEFAULT_BACKOFF: [Duration; 2] = [Duration::from_millis(250), Duration::from_millis(750)];

/// Fixed-schedule retry for transient acquisition failures.
///
/// One attempt is made per backoff entry plus one, so the default schedule
/// allows three attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_backoff(DEFAULT_BACKOFF.to_vec())
    }
}

impl RetryPolicy {
    /// Creates a policy sleeping `backoff[n]` after failed attempt `n + 1`.
    #[must_use]
    pub const fn with_backoff(backoff: Vec<Duration>) -> Self {
        Self { backoff }
    }

    /// The most attempts this policy will make.
    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.backoff.len().saturating_add(1)
    }

    /// Runs `operation` until it succeeds, fails permanently, or attempts run
    /// out.
    ///
    /// `operation` receives the 1-based attempt number. Only errors for which
    /// [`AcquireError::is_transient`] holds are retried.
    ///
    /// # Errors
    ///
    /// Returns the first permanent error, or the last transient error once
    /// every attempt has failed.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, AcquireError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, AcquireError>>,
    {
        let mut delays = self.backoff.iter().copied();
        let mut attempt = 1_usize;
        loop {
            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if !error.is_transient() {
                return Err(error);
            }
            let Some(delay) = delays.next() else {
                warn!(attempt, error = %error, "credential exchange attempts exhausted");
                return Err(error);
            };
            warn!(
                attempt,
                ?delay,
                error = %error,
                "transient credential exchange failure; retrying"
            );
            tokio::time::sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
    }
}
