//! Authoritative registry of stage jobs and their lifecycle.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use campaign_core::{
    CampaignId, Job, JobFilter, JobId, JobOutcome, JobStatus, JobTransition, JobType, OwnerToken,
    StageJobEvent,
};
use chrono::Utc;
use tokio::sync::mpsc;

/// Reason recorded when a job is cancelled without one.
pub const DEFAULT_CANCEL_REASON: &str = "job cancelled";

/// Right to mutate one job: its id plus the epoch the holder last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobLease {
    pub job_id: JobId,
    pub token: OwnerToken,
}

/// Errors returned by the job tracker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Campaign {campaign_id} already has a live {job_type} job ({existing})")]
    DuplicateLiveJob {
        campaign_id: CampaignId,
        job_type: JobType,
        existing: JobId,
    },

    #[error("Stale owner token {held}; job is at {current}")]
    StaleOwner {
        held: OwnerToken,
        current: OwnerToken,
    },

    #[error("Job {0} is already terminal")]
    AlreadyTerminal(JobId),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Result payload for {got} does not match job type {expected}")]
    PayloadMismatch { expected: JobType, got: JobType },
}

#[derive(Default)]
struct TrackerState {
    jobs: HashMap<JobId, Job>,
    live: HashMap<(CampaignId, JobType), JobId>,
}

/// In-memory job registry.
///
/// Every accepted creation or transition is published as a [`StageJobEvent`]
/// while the registry lock is held, so the consumer sees each job's events in
/// the order they were accepted.
pub struct JobTracker {
    state: Mutex<TrackerState>,
    events: mpsc::UnboundedSender<StageJobEvent>,
}

impl JobTracker {
    /// Create a tracker together with the receiving end of its event channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StageJobEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let tracker = Self {
            state: Mutex::new(TrackerState::default()),
            events,
        };
        (tracker, rx)
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, job: &Job) {
        if self.events.send(StageJobEvent::from_job(job)).is_err() {
            tracing::debug!(job_id = %job.id, "No listener for job events");
        }
    }

    /// Allocate a pending job for `(campaign_id, job_type)`.
    pub fn create(&self, campaign_id: CampaignId, job_type: JobType) -> Result<JobLease, TrackerError> {
        let mut state = self.lock();
        if let Some(existing) = state.live.get(&(campaign_id, job_type)) {
            let error = TrackerError::DuplicateLiveJob {
                campaign_id,
                job_type,
                existing: *existing,
            };
            tracing::warn!(%campaign_id, %job_type, %error, "Job creation refused");
            return Err(error);
        }

        let job = Job::new(campaign_id, job_type);
        let lease = JobLease {
            job_id: job.id,
            token: job.epoch,
        };
        tracing::info!(job_id = %job.id, %campaign_id, %job_type, "Job created");

        self.emit(&job);
        state.live.insert((campaign_id, job_type), job.id);
        state.jobs.insert(job.id, job);
        Ok(lease)
    }

    /// Apply `transition` on behalf of the lease holder.
    ///
    /// On success the returned lease carries the bumped token; the old lease
    /// is stale from then on. Rejections leave the job untouched.
    pub fn transition(&self, lease: &JobLease, transition: JobTransition) -> Result<JobLease, TrackerError> {
        let mut state = self.lock();
        let result = Self::apply(&mut state, lease, transition);
        match result {
            Ok(job) => {
                let next = JobLease {
                    job_id: job.id,
                    token: job.epoch,
                };
                if job.status.is_terminal() {
                    state.live.remove(&(job.campaign_id, job.job_type));
                }
                tracing::info!(
                    job_id = %job.id,
                    campaign_id = %job.campaign_id,
                    status = %job.status,
                    epoch = %job.epoch,
                    "Job transitioned"
                );
                self.emit(&job);
                Ok(next)
            }
            Err(error) => {
                tracing::warn!(job_id = %lease.job_id, token = %lease.token, %error, "Job transition rejected");
                Err(error)
            }
        }
    }

    fn apply(state: &mut TrackerState, lease: &JobLease, transition: JobTransition) -> Result<Job, TrackerError> {
        let job = state
            .jobs
            .get_mut(&lease.job_id)
            .ok_or(TrackerError::NotFound(lease.job_id))?;

        if job.status.is_terminal() {
            return Err(TrackerError::AlreadyTerminal(job.id));
        }
        if lease.token != job.epoch {
            return Err(TrackerError::StaleOwner {
                held: lease.token,
                current: job.epoch,
            });
        }

        let target = transition.target();
        if !job.status.can_transition_to(target) {
            return Err(TrackerError::InvalidTransition {
                from: job.status,
                to: target,
            });
        }
        if let JobTransition::Complete(ref output) = transition
            && output.job_type() != job.job_type
        {
            return Err(TrackerError::PayloadMismatch {
                expected: job.job_type,
                got: output.job_type(),
            });
        }

        let now = Utc::now().max(job.updated_at);
        match transition {
            JobTransition::Start { task_id } => {
                if task_id.is_some() {
                    job.task_id = task_id;
                }
            }
            JobTransition::Pause | JobTransition::Resume => {}
            JobTransition::Complete(output) => job.outcome = Some(JobOutcome::Result(output)),
            JobTransition::Fail(error) => job.outcome = Some(JobOutcome::Error(error)),
            JobTransition::Cancel(reason) => {
                let reason = reason.unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
                job.outcome = Some(JobOutcome::Error(reason));
            }
        }
        job.status = target;
        job.epoch = job.epoch.bump();
        job.updated_at = now;
        if target.is_terminal() && job.completed_at.is_none() {
            job.completed_at = Some(now);
        }
        Ok(job.clone())
    }

    pub fn get(&self, job_id: JobId) -> Option<Job> {
        self.lock().jobs.get(&job_id).cloned()
    }

    /// Jobs matching `filter`, oldest first, paged by `offset`/`limit`.
    pub fn list(&self, filter: &JobFilter) -> Vec<Job> {
        let state = self.lock();
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.0.cmp(&b.id.0)));

        jobs.into_iter()
            .skip(filter.offset.unwrap_or(0))
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect()
    }

    /// The non-terminal job of `job_type` for a campaign, if any.
    pub fn live_job(&self, campaign_id: CampaignId, job_type: JobType) -> Option<Job> {
        let state = self.lock();
        state
            .live
            .get(&(campaign_id, job_type))
            .and_then(|id| state.jobs.get(id))
            .cloned()
    }

    pub fn has_live_jobs(&self, campaign_id: CampaignId) -> bool {
        self.lock().live.keys().any(|(campaign, _)| *campaign == campaign_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::StageOutput;

    fn started(tracker: &JobTracker, campaign_id: CampaignId) -> JobLease {
        let lease = tracker.create(campaign_id, JobType::FetchLeads).unwrap();
        tracker
            .transition(&lease, JobTransition::Start { task_id: Some("task-1".into()) })
            .unwrap()
    }

    #[test]
    fn create_emits_pending_event() {
        let (tracker, mut rx) = JobTracker::new();
        let campaign_id = CampaignId::new();
        let lease = tracker.create(campaign_id, JobType::FetchLeads).unwrap();

        assert_eq!(lease.token, OwnerToken::INITIAL);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.job_id, lease.job_id);
        assert_eq!(event.status, JobStatus::Pending);
    }

    #[test]
    fn duplicate_live_job_is_refused() {
        let (tracker, _rx) = JobTracker::new();
        let campaign_id = CampaignId::new();
        let first = tracker.create(campaign_id, JobType::FetchLeads).unwrap();
        let err = tracker.create(campaign_id, JobType::FetchLeads).unwrap_err();
        assert!(matches!(err, TrackerError::DuplicateLiveJob { existing, .. } if existing == first.job_id));

        // Other job types and other campaigns are unaffected.
        tracker.create(campaign_id, JobType::CleanupCampaign).unwrap();
        tracker.create(CampaignId::new(), JobType::FetchLeads).unwrap();
    }

    #[test]
    fn terminal_job_frees_the_slot() {
        let (tracker, _rx) = JobTracker::new();
        let campaign_id = CampaignId::new();
        let lease = started(&tracker, campaign_id);
        tracker
            .transition(&lease, JobTransition::Fail("worker crashed".into()))
            .unwrap();
        assert!(!tracker.has_live_jobs(campaign_id));
        assert!(tracker.create(campaign_id, JobType::FetchLeads).is_ok());
    }

    #[test]
    fn completion_records_result_and_timestamp() {
        let (tracker, _rx) = JobTracker::new();
        let lease = started(&tracker, CampaignId::new());
        let output = StageOutput::FetchLeads { leads_found: 12 };
        tracker
            .transition(&lease, JobTransition::Complete(output.clone()))
            .unwrap();

        let job = tracker.get(lease.job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result(), Some(&output));
        assert_eq!(job.task_id.as_deref(), Some("task-1"));
        assert!(job.completed_at.is_some());
        assert!(job.error().is_none());
    }

    #[test]
    fn invalid_edge_leaves_job_unchanged() {
        let (tracker, _rx) = JobTracker::new();
        let lease = tracker.create(CampaignId::new(), JobType::FetchLeads).unwrap();
        let before = tracker.get(lease.job_id).unwrap();

        let err = tracker
            .transition(&lease, JobTransition::Complete(StageOutput::FetchLeads { leads_found: 1 }))
            .unwrap_err();
        assert_eq!(
            err,
            TrackerError::InvalidTransition {
                from: JobStatus::Pending,
                to: JobStatus::Completed
            }
        );
        assert_eq!(tracker.get(lease.job_id).unwrap(), before);
    }

    #[test]
    fn stale_owner_cannot_mutate() {
        let (tracker, _rx) = JobTracker::new();
        let original = tracker.create(CampaignId::new(), JobType::FetchLeads).unwrap();
        let current = tracker
            .transition(&original, JobTransition::Start { task_id: None })
            .unwrap();

        let err = tracker.transition(&original, JobTransition::Pause).unwrap_err();
        assert_eq!(
            err,
            TrackerError::StaleOwner {
                held: original.token,
                current: current.token
            }
        );
        assert!(tracker.transition(&current, JobTransition::Pause).is_ok());
    }

    #[test]
    fn terminal_jobs_reject_everything() {
        let (tracker, _rx) = JobTracker::new();
        let lease = started(&tracker, CampaignId::new());
        let done = tracker
            .transition(&lease, JobTransition::Complete(StageOutput::FetchLeads { leads_found: 3 }))
            .unwrap();
        let completed_at = tracker.get(lease.job_id).unwrap().completed_at;

        let err = tracker
            .transition(&done, JobTransition::Fail("late failure".into()))
            .unwrap_err();
        assert_eq!(err, TrackerError::AlreadyTerminal(lease.job_id));
        assert_eq!(tracker.get(lease.job_id).unwrap().completed_at, completed_at);
    }

    #[test]
    fn payload_must_match_job_type() {
        let (tracker, _rx) = JobTracker::new();
        let lease = started(&tracker, CampaignId::new());
        let err = tracker
            .transition(&lease, JobTransition::Complete(StageOutput::GenerateEmails { drafted: 1 }))
            .unwrap_err();
        assert_eq!(
            err,
            TrackerError::PayloadMismatch {
                expected: JobType::FetchLeads,
                got: JobType::GenerateEmails
            }
        );
    }

    #[test]
    fn cancellation_records_reason() {
        let (tracker, _rx) = JobTracker::new();
        let lease = started(&tracker, CampaignId::new());
        tracker.transition(&lease, JobTransition::Cancel(None)).unwrap();
        let job = tracker.get(lease.job_id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.error(), Some(DEFAULT_CANCEL_REASON));
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn pause_and_resume() {
        let (tracker, mut rx) = JobTracker::new();
        let lease = started(&tracker, CampaignId::new());
        let paused = tracker.transition(&lease, JobTransition::Pause).unwrap();
        let resumed = tracker.transition(&paused, JobTransition::Resume).unwrap();
        assert_eq!(tracker.get(resumed.job_id).unwrap().status, JobStatus::Processing);

        let statuses: Vec<JobStatus> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|event| event.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                JobStatus::Pending,
                JobStatus::Processing,
                JobStatus::Paused,
                JobStatus::Processing
            ]
        );
    }

    #[test]
    fn list_filters_and_pages() {
        let (tracker, _rx) = JobTracker::new();
        let campaign_id = CampaignId::new();
        tracker.create(campaign_id, JobType::FetchLeads).unwrap();
        tracker.create(campaign_id, JobType::CleanupCampaign).unwrap();
        tracker.create(CampaignId::new(), JobType::FetchLeads).unwrap();

        let mine = tracker.list(&JobFilter::for_campaign(campaign_id));
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|job| job.campaign_id == campaign_id));

        let paged = tracker.list(&JobFilter {
            limit: Some(1),
            offset: Some(1),
            ..JobFilter::default()
        });
        assert_eq!(paged.len(), 1);

        let pending = tracker.list(&JobFilter::default().with_status(JobStatus::Processing));
        assert!(pending.is_empty());
    }
}
