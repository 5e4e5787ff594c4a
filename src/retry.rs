//! Retry policy for activities and child workflows.
//!
//! Retries are durable: each backoff is a timer recorded in history, so a
//! retrying call replays to the same attempt on every pass.

use crate::error::WorkflowError;
use std::time::Duration;

const DEFAULT_MAX_RETRY_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    first_retry_interval: Duration,
    backoff_coefficient: f64,
    max_retry_interval: Duration,
    retry_timeout: Option<Duration>,
}

impl RetryPolicy {
    /// Build a policy with a backoff coefficient of 1.0, a one hour interval cap and no timeout.
    ///
    /// # Errors
    ///
    /// `max_attempts` must be positive and `first_retry_interval` non-zero.
    pub fn new(max_attempts: u32, first_retry_interval: Duration) -> Result<Self, WorkflowError> {
        if max_attempts == 0 {
            return Err(WorkflowError::InvalidArgument(
                "max_attempts must be greater than zero".to_string(),
            ));
        }
        if first_retry_interval.is_zero() {
            return Err(WorkflowError::InvalidArgument(
                "first_retry_interval must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            first_retry_interval,
            backoff_coefficient: 1.0,
            max_retry_interval: DEFAULT_MAX_RETRY_INTERVAL.max(first_retry_interval),
            retry_timeout: None,
        })
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Result<Self, WorkflowError> {
        if coefficient.is_nan() || coefficient < 1.0 {
            return Err(WorkflowError::InvalidArgument(
                "backoff_coefficient must be at least 1.0".to_string(),
            ));
        }
        self.backoff_coefficient = coefficient;
        Ok(self)
    }

    pub fn with_max_retry_interval(mut self, interval: Duration) -> Result<Self, WorkflowError> {
        if interval < self.first_retry_interval {
            return Err(WorkflowError::InvalidArgument(
                "max_retry_interval must not be shorter than first_retry_interval".to_string(),
            ));
        }
        self.max_retry_interval = interval;
        Ok(self)
    }

    pub fn with_retry_timeout(mut self, timeout: Duration) -> Result<Self, WorkflowError> {
        if timeout < self.first_retry_interval {
            return Err(WorkflowError::InvalidArgument(
                "retry_timeout must not be shorter than first_retry_interval".to_string(),
            ));
        }
        self.retry_timeout = Some(timeout);
        Ok(self)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn first_retry_interval(&self) -> Duration {
        self.first_retry_interval
    }

    pub fn backoff_coefficient(&self) -> f64 {
        self.backoff_coefficient
    }

    pub fn max_retry_interval(&self) -> Duration {
        self.max_retry_interval
    }

    pub fn retry_timeout(&self) -> Option<Duration> {
        self.retry_timeout
    }

    /// Delay before the retry that follows failed attempt number `attempt` (1-based).
    ///
    /// `first * coefficient^(attempt - 1)`, capped at the max retry interval.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let millis = self.first_retry_interval.as_secs_f64() * 1000.0 * self.backoff_coefficient.powi(exponent);
        let cap = self.max_retry_interval.as_secs_f64() * 1000.0;
        if !millis.is_finite() || millis >= cap {
            return self.max_retry_interval;
        }
        Duration::from_secs_f64(millis / 1000.0)
    }

    /// Whether another attempt may follow attempt `attempt` given the backoff already spent.
    pub(crate) fn allows_retry(&self, attempt: u32, elapsed: Duration) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        match self.retry_timeout {
            Some(timeout) => elapsed + self.next_delay(attempt) <= timeout,
            None => true,
        }
    }
}
