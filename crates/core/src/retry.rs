//! Bounded retry with exponential backoff
//!
//! Every retried operation in the link goes through [`Retrier::run`] so the
//! backoff shape and the non-recoverable short-circuit live in one place.

use crate::error::is_non_recoverable_message;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy configuration
///
/// Controls how many attempts are made and how the delay between them grows.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (default: 3)
    pub max_attempts: u32,
    /// Initial backoff delay (default: 500ms)
    pub base_delay: Duration,
    /// Maximum backoff delay (default: 10s)
    pub max_delay: Duration,
    /// Backoff multiplier per attempt (default: 2.0)
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Calculate the backoff delay before the given attempt.
    ///
    /// `attempt` is 0-indexed: the delay before retry N is `delay_for(N - 1)`.
    /// The exponential curve is clamped to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let millis =
            (self.base_delay.as_millis() as f64) * self.multiplier.powi(attempt as i32);
        let millis = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Check if another attempt is allowed after `attempt` completed ones.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Executes operations under a [`RetryPolicy`].
pub struct Retrier {
    policy: RetryPolicy,
    label: String,
}

impl Retrier {
    /// Create a retrier with the given policy.
    ///
    /// `label` names the operation in logs.
    pub fn new(label: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            policy,
            label: label.into(),
        }
    }

    /// Run `operation` until it succeeds, the attempts are exhausted, or a
    /// non-recoverable error is returned.
    ///
    /// Non-recoverable errors (classified by message content, see
    /// [`crate::error::is_non_recoverable_message`]) are rethrown
    /// immediately with zero retries.
    pub async fn run<T, E, F, Fut>(&self, operation: F) -> std::result::Result<T, E>
    where
        E: std::fmt::Display,
        F: Fn(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.run_with_hook(operation, |_, _| {}).await
    }

    /// Same as [`Retrier::run`] with a per-attempt hook invoked after each
    /// failed attempt that will be retried.
    pub async fn run_with_hook<T, E, F, Fut, H>(
        &self,
        operation: F,
        mut on_retry: H,
    ) -> std::result::Result<T, E>
    where
        E: std::fmt::Display,
        F: Fn(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        H: FnMut(u32, &E),
    {
        let mut attempt = 0u32;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;

                    if is_non_recoverable_message(&err.to_string()) {
                        warn!(
                            "'{}' failed with non-recoverable error, not retrying: {}",
                            self.label, err
                        );
                        return Err(err);
                    }

                    if !self.policy.should_retry(attempt) {
                        warn!(
                            "'{}' failed after {} attempts: {}",
                            self.label, attempt, err
                        );
                        return Err(err);
                    }

                    let delay = self.policy.delay_for(attempt - 1);
                    debug!(
                        "'{}' attempt {}/{} failed ({}), retrying in {:?}",
                        self.label, attempt, self.policy.max_attempts, err, delay
                    );
                    on_retry(attempt, &err);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
