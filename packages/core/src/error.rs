//! Error types shared across the pipeline.

use thiserror::Error;

/// Failure reported by the external job broker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The request never got a response (connection refused, reset, DNS).
    #[error("no response from broker: {0}")]
    NoResponse(String),

    #[error("broker request timed out")]
    Timeout,

    /// The broker answered with an HTTP status.
    #[error("broker returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// The request was rejected before reaching the broker's workers.
    #[error("invalid job request: {0}")]
    Validation(String),
}

impl BrokerError {
    /// Transient failures: no response, timeout, or a 5xx answer.
    pub fn is_transient(&self) -> bool {
        match self {
            BrokerError::NoResponse(_) | BrokerError::Timeout => true,
            BrokerError::Status { status, .. } => (500..600).contains(status),
            BrokerError::Validation(_) => false,
        }
    }

    /// Create an error from an HTTP status code.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        BrokerError::Status {
            status,
            message: message.into(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(String),
}
