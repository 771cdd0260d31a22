//! Job queries.

use campaign_core::{Job, JobFilter, JobId, JobStatus, JobType};
use serde::{Deserialize, Serialize};

use crate::campaigns::parse_campaign_id;
use crate::error::ApiError;
use crate::init::PipelineApi;

const STATUSES: [JobStatus; 6] = [
    JobStatus::Pending,
    JobStatus::Processing,
    JobStatus::Completed,
    JobStatus::Failed,
    JobStatus::Cancelled,
    JobStatus::Paused,
];

const JOB_TYPES: [JobType; 5] = [
    JobType::FetchLeads,
    JobType::VerifyEmails,
    JobType::EnrichLead,
    JobType::GenerateEmails,
    JobType::CleanupCampaign,
];

/// Query parameters for listing jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobQuery {
    pub campaign_id: Option<String>,
    /// Status name, case-insensitive (`processing`, `FAILED`, ...).
    pub status: Option<String>,
    /// Job type name, case-insensitive (`fetch_leads`, ...).
    pub job_type: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl JobQuery {
    fn into_filter(self) -> Result<JobFilter, ApiError> {
        let campaign_id = self.campaign_id.as_deref().map(parse_campaign_id).transpose()?;
        let status = self
            .status
            .as_deref()
            .map(|name| {
                STATUSES
                    .into_iter()
                    .find(|status| status.as_str().eq_ignore_ascii_case(name))
                    .ok_or_else(|| ApiError::InvalidId {
                        kind: "job status",
                        value: name.to_string(),
                    })
            })
            .transpose()?;
        let job_type = self
            .job_type
            .as_deref()
            .map(|name| {
                JOB_TYPES
                    .into_iter()
                    .find(|job_type| job_type.as_str().eq_ignore_ascii_case(name))
                    .ok_or_else(|| ApiError::InvalidId {
                        kind: "job type",
                        value: name.to_string(),
                    })
            })
            .transpose()?;

        Ok(JobFilter {
            campaign_id,
            status,
            job_type,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

impl PipelineApi {
    /// List jobs, oldest first.
    pub fn list_jobs(&self, query: JobQuery) -> Result<Vec<Job>, ApiError> {
        let filter = query.into_filter()?;
        Ok(self.inner.tracker.list(&filter))
    }

    /// Get a job by ID.
    pub fn get_job(&self, id: &str) -> Result<Job, ApiError> {
        let job_id = JobId::parse(id).map_err(|_| ApiError::InvalidId {
            kind: "job ID",
            value: id.to_string(),
        })?;
        self.inner
            .tracker
            .get(job_id)
            .ok_or_else(|| ApiError::NotFound(format!("Job {job_id}")))
    }
}
