//! Message types for actor communication.

use campaign_core::{Campaign, CampaignId, StageJobEvent};
use ractor::RpcReplyPort;

/// Messages for the CampaignCoordinator.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// Create a new campaign in CREATED.
    CreateCampaign {
        name: String,
        reply: RpcReplyPort<Result<Campaign, CoordinatorError>>,
    },

    /// Get a campaign by ID.
    GetCampaign {
        campaign_id: CampaignId,
        reply: RpcReplyPort<Option<Campaign>>,
    },

    /// List all campaigns, oldest first.
    ListCampaigns { reply: RpcReplyPort<Vec<Campaign>> },

    /// Delete a campaign that has no live jobs.
    DeleteCampaign {
        campaign_id: CampaignId,
        reply: RpcReplyPort<Result<(), CoordinatorError>>,
    },

    /// A stage job changed status.
    JobStatusChanged(StageJobEvent),

    /// Stop the coordinator.
    Shutdown,
}

/// Error type for coordinator operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Campaign not found: {0}")]
    CampaignNotFound(CampaignId),

    #[error("Campaign name must not be empty")]
    EmptyName,

    #[error("Campaign {0} still has live jobs")]
    LiveJobs(CampaignId),
}
