//! Drives stage jobs through the broker.
//!
//! Submission and status polls go through the [`RetryExecutor`], so they are
//! gated by the circuit breaker and suspended while offline. Every status
//! change lands in the [`JobTracker`], which reports it to the coordinator.

use std::sync::Arc;
use std::time::Duration;

use campaign_core::{
    Campaign, CampaignId, DispatchConfig, Job, JobId, JobStatus, JobTransition, JobType, Stage,
};

use crate::broker::{JobBroker, JobRequest, TaskState};
use crate::retry::{RetryError, RetryExecutor, RetryHandle};
use crate::tracker::{JobLease, JobTracker, TrackerError};

/// Reason recorded when a dispatch is cancelled by its caller.
pub const DISPATCH_CANCELLED: &str = "dispatch cancelled";
/// Reason recorded when the broker revokes a task.
pub const TASK_REVOKED: &str = "task revoked by broker";

/// Errors from dispatching stage jobs.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The job was not submitted and is still pending. Hand the lease back to
    /// [`StageDispatcher::resubmit`] once the cause has cleared.
    #[error("Submission of job {} deferred: {cause}", .lease.job_id)]
    Deferred { lease: JobLease, cause: RetryError },

    /// The broker refused the job for good; the job is recorded as failed.
    #[error("Submission of job {job_id} failed: {cause}")]
    Submission { job_id: JobId, cause: RetryError },

    /// Lost track of a running job; the job is recorded as failed.
    #[error("Polling job {job_id} failed: {cause}")]
    Poll { job_id: JobId, cause: RetryError },

    #[error("Job {job_id} did not finish within {polls} polls")]
    TimedOut { job_id: JobId, polls: u32 },

    #[error("Dispatch of job {0} cancelled")]
    Cancelled(JobId),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// Runs stage jobs end to end.
pub struct StageDispatcher {
    tracker: Arc<JobTracker>,
    broker: Arc<dyn JobBroker>,
    executor: Arc<RetryExecutor>,
    config: DispatchConfig,
}

impl StageDispatcher {
    pub fn new(
        tracker: Arc<JobTracker>,
        broker: Arc<dyn JobBroker>,
        executor: Arc<RetryExecutor>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            tracker,
            broker,
            executor,
            config,
        }
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    pub fn executor(&self) -> &Arc<RetryExecutor> {
        &self.executor
    }

    /// Create a pending job for the stage and submit it.
    pub async fn submit_stage(
        &self,
        campaign_id: CampaignId,
        job_type: JobType,
        handle: &RetryHandle,
    ) -> Result<JobLease, DispatchError> {
        let lease = self.tracker.create(campaign_id, job_type)?;
        self.resubmit(lease, handle).await
    }

    /// Submit a pending job. On success the job is PROCESSING and carries the
    /// broker's task id.
    pub async fn resubmit(&self, lease: JobLease, handle: &RetryHandle) -> Result<JobLease, DispatchError> {
        let job = self
            .tracker
            .get(lease.job_id)
            .ok_or(TrackerError::NotFound(lease.job_id))?;
        let request = JobRequest::for_job(&job);
        tracing::info!(
            job_id = %job.id,
            campaign_id = %job.campaign_id,
            job_type = %job.job_type,
            "Submitting stage job"
        );

        let submitted = self
            .executor
            .run(handle, |_| self.broker.submit(&request))
            .await;

        match submitted {
            Ok(task_id) => {
                let lease = self.tracker.transition(
                    &lease,
                    JobTransition::Start {
                        task_id: Some(task_id),
                    },
                )?;
                Ok(lease)
            }
            Err(cause @ (RetryError::CircuitOpen { .. } | RetryError::Cancelled)) => {
                tracing::warn!(job_id = %lease.job_id, %cause, "Submission deferred; job stays pending");
                Err(DispatchError::Deferred { lease, cause })
            }
            Err(cause) => {
                tracing::warn!(job_id = %lease.job_id, %cause, "Submission failed");
                let started = self
                    .tracker
                    .transition(&lease, JobTransition::Start { task_id: None })?;
                self.tracker
                    .transition(&started, JobTransition::Fail(cause.to_string()))?;
                Err(DispatchError::Submission {
                    job_id: lease.job_id,
                    cause,
                })
            }
        }
    }

    /// Poll the broker until the job finishes and record its outcome.
    ///
    /// Gives up after `max_polls` answered polls. While the breaker is open
    /// the loop waits out the breaker's backoff without spending polls.
    pub async fn await_completion(&self, lease: JobLease, handle: &RetryHandle) -> Result<Job, DispatchError> {
        let job = self
            .tracker
            .get(lease.job_id)
            .ok_or(TrackerError::NotFound(lease.job_id))?;
        let Some(task_id) = job.task_id.clone() else {
            let lease = self.fail(lease, "job has no broker task id".into())?;
            return self.snapshot(lease);
        };

        let mut polls = 0;
        loop {
            if polls >= self.config.max_polls {
                self.fail(lease, format!("job did not finish within {polls} polls"))?;
                return Err(DispatchError::TimedOut {
                    job_id: lease.job_id,
                    polls,
                });
            }

            let polled = self.executor.run(handle, |_| self.broker.poll(&task_id)).await;
            let state = match polled {
                Ok(state) => state,
                Err(RetryError::Cancelled) => return Err(self.cancel(lease)?),
                Err(RetryError::CircuitOpen { retry_after }) => {
                    tracing::debug!(job_id = %lease.job_id, ?retry_after, "Breaker open; delaying poll");
                    self.wait(retry_after, lease, handle).await?;
                    continue;
                }
                Err(cause) => {
                    self.fail(lease, format!("lost contact with broker: {cause}"))?;
                    return Err(DispatchError::Poll {
                        job_id: lease.job_id,
                        cause,
                    });
                }
            };
            // Polls the breaker turned away do not count.
            polls += 1;

            let transition = match state {
                TaskState::Queued | TaskState::Running => {
                    self.wait(self.config.poll_interval(), lease, handle).await?;
                    continue;
                }
                TaskState::Succeeded(output) => JobTransition::Complete(output),
                TaskState::Failed(error) => JobTransition::Fail(error),
                TaskState::Revoked => JobTransition::Cancel(Some(TASK_REVOKED.into())),
            };

            let lease = match self.tracker.transition(&lease, transition) {
                Ok(lease) => lease,
                Err(error @ TrackerError::PayloadMismatch { .. }) => {
                    self.fail(lease, error.to_string())?
                }
                Err(error) => return Err(error.into()),
            };
            return self.snapshot(lease);
        }
    }

    /// Submit the stage job and wait for it to finish.
    pub async fn run_stage(
        &self,
        campaign_id: CampaignId,
        job_type: JobType,
        handle: &RetryHandle,
    ) -> Result<Job, DispatchError> {
        let lease = self.submit_stage(campaign_id, job_type, handle).await?;
        self.await_completion(lease, handle).await
    }

    /// Run the campaign's remaining stages in order, stopping at the first
    /// stage job that does not complete. Returns the stage jobs that ran.
    ///
    /// A pending job left behind by a deferred submission is picked up
    /// instead of creating a new one.
    pub async fn run_campaign(&self, campaign: &Campaign, handle: &RetryHandle) -> Result<Vec<Job>, DispatchError> {
        let Some(first) = campaign.active_stage() else {
            return Ok(Vec::new());
        };

        let mut jobs = Vec::new();
        for stage in Stage::ALL.into_iter().skip(first.index()) {
            let job_type = JobType::for_stage(stage);
            let lease = match self.tracker.live_job(campaign.id, job_type) {
                Some(job) if job.status == JobStatus::Pending => {
                    let lease = JobLease {
                        job_id: job.id,
                        token: job.epoch,
                    };
                    self.resubmit(lease, handle).await?
                }
                _ => self.submit_stage(campaign.id, job_type, handle).await?,
            };

            let job = self.await_completion(lease, handle).await?;
            let completed = job.status == JobStatus::Completed;
            tracing::info!(
                campaign_id = %campaign.id,
                %stage,
                status = %job.status,
                "Stage finished"
            );
            jobs.push(job);
            if !completed {
                break;
            }
        }
        Ok(jobs)
    }

    async fn wait(&self, delay: Duration, lease: JobLease, handle: &RetryHandle) -> Result<(), DispatchError> {
        tokio::select! {
            biased;
            _ = handle.token().cancelled() => Err(self.cancel(lease)?),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    fn fail(&self, lease: JobLease, error: String) -> Result<JobLease, TrackerError> {
        self.tracker.transition(&lease, JobTransition::Fail(error))
    }

    /// Record the job as cancelled and build the matching error.
    fn cancel(&self, lease: JobLease) -> Result<DispatchError, TrackerError> {
        self.tracker
            .transition(&lease, JobTransition::Cancel(Some(DISPATCH_CANCELLED.into())))?;
        Ok(DispatchError::Cancelled(lease.job_id))
    }

    fn snapshot(&self, lease: JobLease) -> Result<Job, DispatchError> {
        self.tracker
            .get(lease.job_id)
            .ok_or(DispatchError::Tracker(TrackerError::NotFound(lease.job_id)))
    }
}
