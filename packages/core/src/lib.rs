//! Core domain types for the campaign pipeline.
//!
//! This crate contains shared types used across all packages:
//! - Campaign, Stage and CampaignStatus for the pipeline lifecycle
//! - Job, JobStatus and typed stage payloads for background jobs
//! - Circuit breaker status and pipeline tunables
//! - Events for status propagation and real-time updates
//! - The pure campaign state machine ([`machine::advance`])

mod breaker;
mod campaign;
mod config;
mod error;
mod events;
mod job;
pub mod machine;

pub use breaker::{BreakerConfig, BreakerMetadata, CircuitBreakerStatus, CircuitState, OpenReason};
pub use campaign::{Campaign, CampaignId, CampaignStatus, Stage};
pub use config::{DispatchConfig, PipelineConfig, RetryPolicy};
pub use error::{BrokerError, ConfigError};
pub use events::{PipelineEvent, StageJobEvent};
pub use job::{
    Job, JobFilter, JobId, JobOutcome, JobStatus, JobTransition, JobType, OwnerToken, StageOutput,
};
pub use machine::{Advance, DiscardReason, InvariantViolation, advance};
