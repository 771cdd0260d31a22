//! Pipeline tunables.
//!
//! Every section is `#[serde(default)]`, so a partial TOML/JSON document only
//! overrides the values it names.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{BreakerConfig, ConfigError};

/// Bounded exponential backoff for broker calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry (milliseconds).
    pub initial_delay_ms: u64,
    /// Factor applied to the delay after every failed attempt.
    pub backoff_multiplier: f64,
    /// Upper bound for any single delay (milliseconds).
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the failure of zero-based attempt `attempt`:
    /// `min(initial * multiplier^attempt, max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Tunables for driving jobs through the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Interval between broker status polls (milliseconds).
    pub poll_interval_ms: u64,
    /// Polls allowed before a running job is considered lost.
    pub max_polls: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            max_polls: 600,
        }
    }
}

impl DispatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Top-level configuration for the pipeline coordinator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub breaker: BreakerConfig,
    pub retry: RetryPolicy,
    pub dispatch: DispatchConfig,
}

impl PipelineConfig {
    /// Reject tunables that cannot describe a working pipeline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if let Some(rate) = self.breaker.failure_rate_threshold
            && !(rate > 0.0 && rate <= 1.0)
        {
            return Err(ConfigError::Invalid(format!(
                "breaker.failure_rate_threshold must be in (0, 1], got {rate}"
            )));
        }
        if self.breaker.failure_rate_threshold.is_some()
            && self.breaker.min_window_samples > self.breaker.window_size
        {
            return Err(ConfigError::Invalid(
                "breaker.min_window_samples cannot exceed breaker.window_size".into(),
            ));
        }
        if self.breaker.failure_threshold <= self.retry.max_retries {
            return Err(ConfigError::Invalid(format!(
                "breaker.failure_threshold ({}) must exceed retry.max_retries ({})",
                self.breaker.failure_threshold, self.retry.max_retries
            )));
        }
        if self.breaker.failure_rate_threshold.is_some()
            && self.breaker.min_window_samples <= self.retry.max_retries as usize
        {
            return Err(ConfigError::Invalid(format!(
                "breaker.min_window_samples ({}) must exceed retry.max_retries ({})",
                self.breaker.min_window_samples, self.retry.max_retries
            )));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.backoff_multiplier must be >= 1.0, got {}",
                self.retry.backoff_multiplier
            )));
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.max_delay_ms cannot be smaller than retry.initial_delay_ms".into(),
            ));
        }
        if self.dispatch.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.poll_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}
