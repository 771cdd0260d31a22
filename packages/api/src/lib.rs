//! API for the campaign pipeline.
//!
//! This crate contains the boundary operations:
//! - Campaign management (create, status, list, delete, start)
//! - Job queries (list, get)
//! - Circuit breaker status and operator overrides
//! - Real-time events (subscription, stream, SSE framing)

mod breaker;
mod campaigns;
mod error;
mod init;
mod jobs;
mod realtime;

pub use breaker::{BreakerAction, BreakerOverride, BreakerOverrideResponse};
pub use campaigns::{CampaignStatusView, RunningCampaign};
pub use error::{ApiError, InitError};
pub use init::{PipelineApi, init_pipeline};
pub use jobs::JobQuery;
pub use realtime::format_sse_event;

// Re-export core types for convenience
pub use campaign_core::{
    Campaign, CampaignId, CampaignStatus, CircuitBreakerStatus, CircuitState, Job, JobId,
    JobStatus, JobType, PipelineConfig, PipelineEvent, Stage,
};
