//! Event types for status propagation and real-time updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Campaign, CampaignId, CampaignStatus, CircuitBreakerStatus, Job, JobId, JobStatus, JobType,
    OpenReason,
};

/// A job status change for one campaign stage, as consumed by the campaign
/// state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageJobEvent {
    pub job_id: JobId,
    pub campaign_id: CampaignId,
    pub job_type: JobType,
    pub status: JobStatus,
    /// The job's error when it failed or was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl StageJobEvent {
    /// Snapshot the current status of `job` as an event.
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            campaign_id: job.campaign_id,
            job_type: job.job_type,
            status: job.status,
            error: job.error().map(str::to_owned),
            occurred_at: job.updated_at,
        }
    }
}

/// Events emitted by the pipeline for real-time updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    // Campaign events
    /// A new campaign was created.
    CampaignCreated {
        campaign: Campaign,
        timestamp: DateTime<Utc>,
    },
    /// A campaign's status changed.
    CampaignStatusChanged {
        campaign_id: CampaignId,
        old_status: CampaignStatus,
        new_status: CampaignStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// A job event violated the pipeline order and was refused.
    EventRejected {
        campaign_id: CampaignId,
        job_id: JobId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    // Job events
    /// A job's status changed.
    JobStatusChanged {
        job: StageJobEvent,
        timestamp: DateTime<Utc>,
    },

    // Admission events
    /// The circuit breaker opened and submissions are being rejected.
    BreakerOpened {
        reason: OpenReason,
        status: CircuitBreakerStatus,
        timestamp: DateTime<Utc>,
    },
    /// The circuit breaker closed and submissions are admitted again.
    BreakerClosed {
        status: CircuitBreakerStatus,
        timestamp: DateTime<Utc>,
    },

    // Connectivity events
    /// Connectivity to the backend changed.
    ConnectivityChanged {
        online: bool,
        slow: bool,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            PipelineEvent::CampaignCreated { timestamp, .. } => *timestamp,
            PipelineEvent::CampaignStatusChanged { timestamp, .. } => *timestamp,
            PipelineEvent::EventRejected { timestamp, .. } => *timestamp,
            PipelineEvent::JobStatusChanged { timestamp, .. } => *timestamp,
            PipelineEvent::BreakerOpened { timestamp, .. } => *timestamp,
            PipelineEvent::BreakerClosed { timestamp, .. } => *timestamp,
            PipelineEvent::ConnectivityChanged { timestamp, .. } => *timestamp,
        }
    }

    /// Get the campaign ID associated with this event, if any.
    pub fn campaign_id(&self) -> Option<CampaignId> {
        match self {
            PipelineEvent::CampaignCreated { campaign, .. } => Some(campaign.id),
            PipelineEvent::CampaignStatusChanged { campaign_id, .. } => Some(*campaign_id),
            PipelineEvent::EventRejected { campaign_id, .. } => Some(*campaign_id),
            PipelineEvent::JobStatusChanged { job, .. } => Some(job.campaign_id),
            _ => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            PipelineEvent::CampaignCreated { campaign, .. } => {
                format!("Campaign '{}' created", campaign.name)
            }
            PipelineEvent::CampaignStatusChanged {
                campaign_id,
                new_status,
                status_error,
                ..
            } => match status_error {
                Some(error) => format!("Campaign {} -> {}: {}", campaign_id, new_status, error),
                None => format!("Campaign {} -> {}", campaign_id, new_status),
            },
            PipelineEvent::EventRejected { job_id, reason, .. } => {
                format!("Event for job {} rejected: {}", job_id, reason)
            }
            PipelineEvent::JobStatusChanged { job, .. } => {
                format!("Job {} ({}) -> {}", job.job_id, job.job_type, job.status)
            }
            PipelineEvent::BreakerOpened { reason, .. } => {
                format!("Circuit breaker opened: {}", reason)
            }
            PipelineEvent::BreakerClosed { .. } => "Circuit breaker closed".to_string(),
            PipelineEvent::ConnectivityChanged { online, slow, .. } => match (online, slow) {
                (false, _) => "Connectivity lost".to_string(),
                (true, true) => "Connectivity restored (slow)".to_string(),
                (true, false) => "Connectivity restored".to_string(),
            },
        }
    }
}
