//! Campaign domain types: the pipeline stages and the campaign record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::JobId;

/// Unique identifier for a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(pub Ulid);

impl CampaignId {
    /// Create a new unique campaign ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a campaign ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for CampaignId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CampaignId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named step of the campaign pipeline, ordered by pipeline position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FetchLeads,
    VerifyEmails,
    EnrichLeads,
    GenerateEmails,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 4] = [
        Stage::FetchLeads,
        Stage::VerifyEmails,
        Stage::EnrichLeads,
        Stage::GenerateEmails,
    ];

    /// Zero-based position in the pipeline.
    pub fn index(self) -> usize {
        match self {
            Stage::FetchLeads => 0,
            Stage::VerifyEmails => 1,
            Stage::EnrichLeads => 2,
            Stage::GenerateEmails => 3,
        }
    }

    /// The stage that follows this one, or `None` for the last stage.
    pub fn next(self) -> Option<Stage> {
        Stage::ALL.get(self.index() + 1).copied()
    }

    /// The first stage of every campaign.
    pub fn first() -> Stage {
        Stage::FetchLeads
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::FetchLeads => "fetch_leads",
            Stage::VerifyEmails => "verify_emails",
            Stage::EnrichLeads => "enrich_leads",
            Stage::GenerateEmails => "generate_emails",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a campaign.
///
/// `Completed` and `Failed` are terminal. The status is only ever changed by
/// [`crate::machine::advance`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    #[default]
    Created,
    FetchingLeads,
    VerifyingEmails,
    EnrichingLeads,
    GeneratingEmails,
    Completed,
    Failed,
}

impl CampaignStatus {
    /// The stage this status is working on, if any.
    pub fn stage(self) -> Option<Stage> {
        match self {
            CampaignStatus::FetchingLeads => Some(Stage::FetchLeads),
            CampaignStatus::VerifyingEmails => Some(Stage::VerifyEmails),
            CampaignStatus::EnrichingLeads => Some(Stage::EnrichLeads),
            CampaignStatus::GeneratingEmails => Some(Stage::GenerateEmails),
            CampaignStatus::Created | CampaignStatus::Completed | CampaignStatus::Failed => None,
        }
    }

    /// The status that represents work on `stage`.
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::FetchLeads => CampaignStatus::FetchingLeads,
            Stage::VerifyEmails => CampaignStatus::VerifyingEmails,
            Stage::EnrichLeads => CampaignStatus::EnrichingLeads,
            Stage::GenerateEmails => CampaignStatus::GeneratingEmails,
        }
    }

    /// Check if the campaign can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CampaignStatus::Created => "CREATED",
            CampaignStatus::FetchingLeads => "FETCHING_LEADS",
            CampaignStatus::VerifyingEmails => "VERIFYING_EMAILS",
            CampaignStatus::EnrichingLeads => "ENRICHING_LEADS",
            CampaignStatus::GeneratingEmails => "GENERATING_EMAILS",
            CampaignStatus::Completed => "COMPLETED",
            CampaignStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work progressing through the ordered pipeline stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    /// Unique identifier for this campaign.
    pub id: CampaignId,
    /// Human-readable name.
    pub name: String,
    /// Current lifecycle status.
    pub status: CampaignStatus,
    /// Error recorded when the campaign failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_error: Option<String>,
    /// The job recorded for each stage reached so far.
    #[serde(default)]
    pub job_ids: BTreeMap<Stage, JobId>,
    /// When the campaign was created.
    pub created_at: DateTime<Utc>,
    /// When the campaign last changed.
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Create a new campaign in `Created`.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: CampaignId::new(),
            name: name.into(),
            status: CampaignStatus::Created,
            status_error: None,
            job_ids: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The stage the campaign expects work for next.
    ///
    /// `Created` campaigns expect the first stage; terminal campaigns expect nothing.
    pub fn active_stage(&self) -> Option<Stage> {
        match self.status {
            CampaignStatus::Created => Some(Stage::first()),
            status => status.stage(),
        }
    }

    /// The job recorded for `stage`, if any.
    pub fn job_for(&self, stage: Stage) -> Option<JobId> {
        self.job_ids.get(&stage).copied()
    }
}
