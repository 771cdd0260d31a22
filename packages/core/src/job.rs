//! Job domain types for single executions of a pipeline stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{CampaignId, Stage};

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of background job. Pipeline job types map onto a [`Stage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    FetchLeads,
    VerifyEmails,
    EnrichLead,
    GenerateEmails,
    CleanupCampaign,
}

impl JobType {
    /// The pipeline stage this job executes. Maintenance jobs have none.
    pub fn stage(self) -> Option<Stage> {
        match self {
            JobType::FetchLeads => Some(Stage::FetchLeads),
            JobType::VerifyEmails => Some(Stage::VerifyEmails),
            JobType::EnrichLead => Some(Stage::EnrichLeads),
            JobType::GenerateEmails => Some(Stage::GenerateEmails),
            JobType::CleanupCampaign => None,
        }
    }

    /// The job type that executes `stage`.
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::FetchLeads => JobType::FetchLeads,
            Stage::VerifyEmails => JobType::VerifyEmails,
            Stage::EnrichLeads => JobType::EnrichLead,
            Stage::GenerateEmails => JobType::GenerateEmails,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::FetchLeads => "FETCH_LEADS",
            JobType::VerifyEmails => "VERIFY_EMAILS",
            JobType::EnrichLead => "ENRICH_LEAD",
            JobType::GenerateEmails => "GENERATE_EMAILS",
            JobType::CleanupCampaign => "CLEANUP_CAMPAIGN",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current status of a job in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Job is created and waiting to be accepted by the broker.
    #[default]
    Pending,
    /// Job is executing on a worker.
    Processing,
    /// Job completed successfully.
    Completed,
    /// Job failed with an error.
    Failed,
    /// Job was cancelled before completion.
    Cancelled,
    /// Job is paused and will resume processing later.
    Paused,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `self -> to` is one of the allowed lifecycle edges.
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        matches!(
            (self, to),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Cancelled)
                | (JobStatus::Processing, JobStatus::Paused)
                | (JobStatus::Paused, JobStatus::Processing)
        )
    }

    /// Get a simple status string for display.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Paused => "paused",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proof of ownership over a job: the epoch the holder last observed.
///
/// Issued at creation and bumped on every accepted transition, so a worker
/// holding an older epoch can no longer mutate the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerToken(pub u64);

impl OwnerToken {
    /// Token issued with a freshly created job.
    pub const INITIAL: OwnerToken = OwnerToken(1);

    /// The token that supersedes this one.
    pub fn bump(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "epoch-{}", self.0)
    }
}

/// Result payload of a completed job, keyed by the job type that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageOutput {
    FetchLeads { leads_found: u64 },
    VerifyEmails { verified: u64, rejected: u64 },
    EnrichLead { enriched: u64 },
    GenerateEmails { drafted: u64 },
    CleanupCampaign { removed: u64 },
}

impl StageOutput {
    /// The job type this payload belongs to.
    pub fn job_type(&self) -> JobType {
        match self {
            StageOutput::FetchLeads { .. } => JobType::FetchLeads,
            StageOutput::VerifyEmails { .. } => JobType::VerifyEmails,
            StageOutput::EnrichLead { .. } => JobType::EnrichLead,
            StageOutput::GenerateEmails { .. } => JobType::GenerateEmails,
            StageOutput::CleanupCampaign { .. } => JobType::CleanupCampaign,
        }
    }

    /// Short human-readable summary.
    pub fn summary(&self) -> String {
        match self {
            StageOutput::FetchLeads { leads_found } => format!("{leads_found} leads fetched"),
            StageOutput::VerifyEmails { verified, rejected } => {
                format!("{verified} emails verified, {rejected} rejected")
            }
            StageOutput::EnrichLead { enriched } => format!("{enriched} leads enriched"),
            StageOutput::GenerateEmails { drafted } => format!("{drafted} emails drafted"),
            StageOutput::CleanupCampaign { removed } => format!("{removed} records removed"),
        }
    }
}

/// Terminal payload of a job. Result and error are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Result(StageOutput),
    Error(String),
}

/// A requested job status change together with its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transition", content = "payload", rename_all = "snake_case")]
pub enum JobTransition {
    /// The broker accepted the job and a worker started it.
    Start { task_id: Option<String> },
    Pause,
    Resume,
    Complete(StageOutput),
    Fail(String),
    Cancel(Option<String>),
}

impl JobTransition {
    /// The status reached if the transition is accepted.
    pub fn target(&self) -> JobStatus {
        match self {
            JobTransition::Start { .. } | JobTransition::Resume => JobStatus::Processing,
            JobTransition::Pause => JobStatus::Paused,
            JobTransition::Complete(_) => JobStatus::Completed,
            JobTransition::Fail(_) => JobStatus::Failed,
            JobTransition::Cancel(_) => JobStatus::Cancelled,
        }
    }
}

/// One asynchronous execution of a single pipeline stage for one campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Handle assigned by the external broker once the job is accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// What the job does.
    pub job_type: JobType,
    /// Current status.
    pub status: JobStatus,
    /// Result or error, set on terminal transitions only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<JobOutcome>,
    /// The campaign this job runs for.
    pub campaign_id: CampaignId,
    /// Current ownership epoch.
    pub epoch: OwnerToken,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was last updated.
    pub updated_at: DateTime<Utc>,
    /// When the job reached a terminal status. Never cleared once set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new pending job.
    pub fn new(campaign_id: CampaignId, job_type: JobType) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            task_id: None,
            job_type,
            status: JobStatus::Pending,
            outcome: None,
            campaign_id,
            epoch: OwnerToken::INITIAL,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// The stage this job executes, if it is a pipeline job.
    pub fn stage(&self) -> Option<Stage> {
        self.job_type.stage()
    }

    /// The result payload of a completed job.
    pub fn result(&self) -> Option<&StageOutput> {
        match &self.outcome {
            Some(JobOutcome::Result(output)) => Some(output),
            _ => None,
        }
    }

    /// The error of a failed or cancelled job.
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Some(JobOutcome::Error(error)) => Some(error),
            _ => None,
        }
    }
}

/// Filter options for listing jobs.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobFilter {
    pub campaign_id: Option<CampaignId>,
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl JobFilter {
    /// Jobs belonging to one campaign.
    pub fn for_campaign(campaign_id: CampaignId) -> Self {
        Self {
            campaign_id: Some(campaign_id),
            ..Default::default()
        }
    }

    /// Restrict to one status.
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Check whether a job passes the non-paging criteria.
    pub fn matches(&self, job: &Job) -> bool {
        self.campaign_id.is_none_or(|id| job.campaign_id == id)
            && self.status.is_none_or(|status| job.status == status)
            && self.job_type.is_none_or(|job_type| job.job_type == job_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_edges_match_lifecycle() {
        use JobStatus::*;
        let all = [Pending, Processing, Completed, Failed, Cancelled, Paused];
        let allowed = [
            (Pending, Processing),
            (Processing, Completed),
            (Processing, Failed),
            (Processing, Cancelled),
            (Processing, Paused),
            (Paused, Processing),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_statuses_have_no_outgoing_edges() {
        for status in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(status.is_terminal());
            assert!(!status.can_transition_to(JobStatus::Processing));
        }
    }

    #[test]
    fn pipeline_job_types_map_to_stages() {
        for stage in Stage::ALL {
            assert_eq!(JobType::for_stage(stage).stage(), Some(stage));
        }
        assert_eq!(JobType::CleanupCampaign.stage(), None);
    }

    #[test]
    fn stage_output_is_tagged_by_job_type() {
        let output = StageOutput::VerifyEmails {
            verified: 40,
            rejected: 2,
        };
        assert_eq!(output.job_type(), JobType::VerifyEmails);

        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["job_type"], "VERIFY_EMAILS");
        assert_eq!(json["verified"], 40);
    }

    #[test]
    fn outcome_accessors_are_exclusive() {
        let mut job = Job::new(CampaignId::new(), JobType::FetchLeads);
        assert!(job.result().is_none() && job.error().is_none());

        job.outcome = Some(JobOutcome::Error("broker lost the task".into()));
        assert_eq!(job.error(), Some("broker lost the task"));
        assert!(job.result().is_none());
    }

    #[test]
    fn filter_matches_on_all_criteria() {
        let campaign = CampaignId::new();
        let job = Job::new(campaign, JobType::EnrichLead);

        assert!(JobFilter::default().matches(&job));
        assert!(JobFilter::for_campaign(campaign).matches(&job));
        assert!(!JobFilter::for_campaign(CampaignId::new()).matches(&job));
        assert!(!JobFilter::for_campaign(campaign)
            .with_status(JobStatus::Completed)
            .matches(&job));
    }

    #[test]
    fn owner_token_bumps_monotonically() {
        let token = OwnerToken::INITIAL;
        assert!(token.bump() > token);
        assert_eq!(token.bump().bump(), OwnerToken(3));
    }
}
