//! Seam to the external job broker.

use std::future::Future;
use std::pin::Pin;

use campaign_core::{BrokerError, CampaignId, Job, JobId, JobType, StageOutput};
use serde::{Deserialize, Serialize};

/// Result type for broker calls.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Future type for async broker calls.
pub type BrokerFuture<T> = Pin<Box<dyn Future<Output = BrokerResult<T>> + Send>>;

/// What the broker needs to run one stage job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_id: JobId,
    pub campaign_id: CampaignId,
    pub job_type: JobType,
}

impl JobRequest {
    pub fn for_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            campaign_id: job.campaign_id,
            job_type: job.job_type,
        }
    }
}

/// Broker-side view of a submitted task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Succeeded(StageOutput),
    Failed(String),
    /// The broker dropped the task without running it to completion.
    Revoked,
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded(_) | TaskState::Failed(_) | TaskState::Revoked
        )
    }
}

/// The job broker the pipeline submits stage jobs to.
///
/// Implement this trait to connect the pipeline to a concrete broker.
pub trait JobBroker: Send + Sync + 'static {
    /// Submit a job and return the broker's task id.
    fn submit(&self, request: &JobRequest) -> BrokerFuture<String>;

    /// Fetch the current state of a submitted task.
    fn poll(&self, task_id: &str) -> BrokerFuture<TaskState>;
}
