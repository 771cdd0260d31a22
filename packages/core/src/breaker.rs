//! Circuit breaker status types and tunables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Admission state of the circuit breaker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Submissions are admitted.
    #[default]
    Closed,
    /// Submissions are rejected fast, apart from one probe per cooldown.
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
        }
    }
}

/// Why the breaker last opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum OpenReason {
    /// The consecutive-failure threshold was reached.
    ConsecutiveFailures { count: u32 },
    /// The failure rate over the sliding window crossed its threshold.
    FailureRate { rate: f64, window: usize },
    /// The half-open probe failed.
    ProbeFailed,
    /// An operator forced the breaker open.
    Operator { note: Option<String> },
}

impl std::fmt::Display for OpenReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpenReason::ConsecutiveFailures { count } => {
                write!(f, "{count} consecutive submission failures")
            }
            OpenReason::FailureRate { rate, window } => {
                write!(f, "failure rate {:.0}% over last {window} submissions", rate * 100.0)
            }
            OpenReason::ProbeFailed => write!(f, "recovery probe failed"),
            OpenReason::Operator { note: Some(note) } => write!(f, "forced open: {note}"),
            OpenReason::Operator { note: None } => write!(f, "forced open by operator"),
        }
    }
}

/// Free-form counters and causes attached to the breaker status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerMetadata {
    /// Failures since the last success or reset.
    pub consecutive_failures: u32,
    /// Failures recorded since the last reset.
    pub total_failures: u64,
    /// Successes recorded since the last reset.
    pub total_successes: u64,
    /// Failure rate over the sliding window, once it holds enough samples.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_failure_rate: Option<f64>,
    /// Most recent failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Cause of the most recent opening.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_reason: Option<OpenReason>,
    /// Whether a half-open probe is currently in flight.
    pub probe_in_flight: bool,
    /// How many times the breaker has opened.
    pub trips: u64,
}

/// Snapshot of the process-wide submission breaker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub state: CircuitState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: BreakerMetadata,
}

impl CircuitBreakerStatus {
    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }
}

/// Tunables for the circuit breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker. Must exceed
    /// `retry.max_retries`, or a single retry sequence could open the breaker
    /// before it runs out of attempts.
    pub failure_threshold: u32,
    /// Time an open breaker waits before admitting a probe (milliseconds).
    pub cooldown_ms: u64,
    /// Number of most recent outcomes kept for failure-rate opening.
    pub window_size: usize,
    /// Failure rate (0.0..=1.0) over the window that opens the breaker.
    /// `None` disables rate-based opening.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_rate_threshold: Option<f64>,
    /// Samples required before the failure rate is considered.
    pub min_window_samples: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            cooldown_ms: 30_000,
            window_size: 20,
            failure_rate_threshold: None,
            min_window_samples: 10,
        }
    }
}

impl BreakerConfig {
    pub fn cooldown(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.cooldown_ms)
    }
}
