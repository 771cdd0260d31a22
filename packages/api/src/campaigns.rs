//! Campaign management.

use std::collections::BTreeMap;

use actors::{CoordinatorMessage, DispatchError, RetryHandle};
use campaign_core::{Campaign, CampaignId, CampaignStatus, Job, JobId, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::ApiError;
use crate::init::PipelineApi;

/// Response of the campaign status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStatusView {
    pub campaign_id: CampaignId,
    pub name: String,
    pub status: CampaignStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_error: Option<String>,
    pub job_ids: BTreeMap<Stage, JobId>,
    pub updated_at: DateTime<Utc>,
}

impl From<Campaign> for CampaignStatusView {
    fn from(campaign: Campaign) -> Self {
        Self {
            campaign_id: campaign.id,
            name: campaign.name,
            status: campaign.status,
            status_error: campaign.status_error,
            job_ids: campaign.job_ids,
            updated_at: campaign.updated_at,
        }
    }
}

/// A campaign whose stages are being dispatched in the background.
pub struct RunningCampaign {
    campaign_id: CampaignId,
    handle: RetryHandle,
    task: JoinHandle<Result<Vec<Job>, DispatchError>>,
}

impl RunningCampaign {
    pub fn campaign_id(&self) -> CampaignId {
        self.campaign_id
    }

    /// Progress of the current broker call.
    pub fn handle(&self) -> &RetryHandle {
        &self.handle
    }

    /// Stop dispatching. A pending backoff or offline wait is abandoned
    /// immediately; a running stage job is recorded as cancelled.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Wait for the dispatch to finish and return the stage jobs it ran.
    pub async fn wait(self) -> Result<Vec<Job>, ApiError> {
        self.task
            .await
            .map_err(|e| ApiError::Coordinator(format!("Dispatch task failed: {}", e)))?
            .map_err(ApiError::from)
    }
}

pub(crate) fn parse_campaign_id(id: &str) -> Result<CampaignId, ApiError> {
    CampaignId::parse(id).map_err(|_| ApiError::InvalidId {
        kind: "campaign ID",
        value: id.to_string(),
    })
}

impl PipelineApi {
    /// Create a new campaign.
    pub async fn create_campaign(&self, name: &str) -> Result<Campaign, ApiError> {
        let name = name.to_string();
        self.call(|reply| CoordinatorMessage::CreateCampaign { name, reply })
            .await?
            .map_err(ApiError::from)
    }

    /// Current status of a campaign.
    pub async fn campaign_status(&self, id: &str) -> Result<CampaignStatusView, ApiError> {
        let campaign = self.get_campaign(parse_campaign_id(id)?).await?;
        Ok(campaign.into())
    }

    pub(crate) async fn get_campaign(&self, campaign_id: CampaignId) -> Result<Campaign, ApiError> {
        self.call(|reply| CoordinatorMessage::GetCampaign { campaign_id, reply })
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Campaign {campaign_id}")))
    }

    /// List all campaigns, oldest first.
    pub async fn list_campaigns(&self) -> Result<Vec<Campaign>, ApiError> {
        self.call(|reply| CoordinatorMessage::ListCampaigns { reply }).await
    }

    /// Delete a campaign. Refused while any of its jobs is live.
    pub async fn delete_campaign(&self, id: &str) -> Result<(), ApiError> {
        let campaign_id = parse_campaign_id(id)?;
        self.call(|reply| CoordinatorMessage::DeleteCampaign { campaign_id, reply })
            .await?
            .map_err(ApiError::from)
    }

    /// Dispatch the campaign's remaining stages in the background.
    pub async fn start_campaign(&self, id: &str) -> Result<RunningCampaign, ApiError> {
        let campaign = self.get_campaign(parse_campaign_id(id)?).await?;
        if campaign.status.is_terminal() {
            return Err(ApiError::Conflict(format!(
                "Campaign {} already {}",
                campaign.id, campaign.status
            )));
        }

        let handle = RetryHandle::new();
        {
            let mut running = self.running();
            if running.contains_key(&campaign.id) {
                return Err(ApiError::Conflict(format!(
                    "Campaign {} is already running",
                    campaign.id
                )));
            }
            running.insert(campaign.id, handle.clone());
        }

        tracing::info!(campaign_id = %campaign.id, status = %campaign.status, "Starting campaign");
        let campaign_id = campaign.id;
        let api = self.clone();
        let task_handle = handle.clone();
        let task = tokio::spawn(async move {
            let result = api
                .inner
                .dispatcher
                .run_campaign(&campaign, &task_handle)
                .await;
            api.running().remove(&campaign.id);
            if let Err(ref error) = result {
                tracing::warn!(campaign_id = %campaign.id, %error, "Campaign dispatch stopped");
            }
            result
        });

        Ok(RunningCampaign {
            campaign_id,
            handle,
            task,
        })
    }
}
