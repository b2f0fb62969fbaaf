//! Retry of transient phase failures
//!
//! Exponential backoff with optional jitter. Only failures classified as
//! [`ErrorKind::Transient`](crate::ErrorKind::Transient) are retried; every
//! other failure is returned on the first attempt.

use crate::error::{MigrationError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retrying failed phases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: usize,

    /// Initial interval between retries in seconds
    pub initial_interval_secs: f64,

    /// Multiplier for the interval after each retry
    pub backoff_factor: f64,

    /// Maximum interval between retries in seconds
    pub max_interval_secs: f64,

    /// Whether to add random jitter to intervals
    pub jitter: bool,
}

impl RetryPolicy {
    /// Create a retry policy with the given max attempts
    ///
    /// ```rust
    /// use model_migration::retry::RetryPolicy;
    ///
    /// let policy = RetryPolicy::new(3);
    /// assert_eq!(policy.max_attempts, 3);
    /// ```
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_interval_secs: 0.5,
            backoff_factor: 2.0,
            max_interval_secs: 30.0,
            jitter: true,
        }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self::new(1)
    }

    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval_secs = seconds;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval_secs = seconds;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retrying after the given attempt (0-indexed)
    ///
    /// `initial_interval * backoff_factor ^ attempt`, capped at
    /// `max_interval`, then scaled by a random factor in `0.5..=1.5` when
    /// jitter is enabled.
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        if attempt >= self.max_attempts {
            return Duration::from_secs(0);
        }

        let base_delay = self.initial_interval_secs * self.backoff_factor.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_interval_secs).max(0.0);

        let final_delay = if self.jitter {
            let mut rng = rand::thread_rng();
            capped_delay * rng.gen_range(0.5..=1.5)
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }

    /// Check if another attempt is allowed after `attempt` attempts
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(MigrationError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.initial_interval_secs < 0.0 || self.max_interval_secs < 0.0 {
            return Err(MigrationError::Config(
                "retry intervals must not be negative".into(),
            ));
        }
        if self.backoff_factor < 1.0 {
            return Err(MigrationError::Config(
                "retry.backoff_factor must be at least 1.0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Run an operation, retrying transient failures per the policy
pub async fn retry_transient<F, Fut, T>(policy: &RetryPolicy, label: &str, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && policy.should_retry(attempt + 1) => {
                let delay = policy.calculate_delay(attempt);
                warn!(
                    operation = label,
                    attempt = attempt + 1,
                    error = %error,
                    "Transient failure, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                debug!(operation = label, attempts = attempt + 1, "Giving up");
                return Err(error);
            }
        }
    }
}
