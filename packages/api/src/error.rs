//! Error types for the pipeline API.

use actors::{CoordinatorError, DispatchError, TrackerError};
use campaign_core::ConfigError;

/// Errors returned by [`crate::PipelineApi`] calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid {kind}: {value}")]
    InvalidId { kind: &'static str, value: String },

    #[error("Coordinator unavailable: {0}")]
    Coordinator(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl From<CoordinatorError> for ApiError {
    fn from(error: CoordinatorError) -> Self {
        match error {
            CoordinatorError::CampaignNotFound(id) => ApiError::NotFound(format!("Campaign {id}")),
            CoordinatorError::LiveJobs(_) | CoordinatorError::EmptyName => {
                ApiError::Conflict(error.to_string())
            }
        }
    }
}

/// Errors from [`crate::init_pipeline`].
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to start campaign coordinator: {0}")]
    Coordinator(String),
}
