//! Coordinator actor owning every campaign.

use std::collections::BTreeMap;
use std::sync::Arc;

use campaign_core::{Advance, Campaign, CampaignId, PipelineEvent, StageJobEvent, advance};
use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::{broadcast, mpsc};

use crate::messages::{CoordinatorError, CoordinatorMessage};
use crate::tracker::JobTracker;

/// State for the coordinator actor.
pub struct CoordinatorState {
    /// All campaigns by ID. ULID order is creation order.
    pub campaigns: BTreeMap<CampaignId, Campaign>,
    /// Event broadcaster.
    pub event_tx: broadcast::Sender<PipelineEvent>,
    /// Job registry, consulted before deleting a campaign.
    pub tracker: Arc<JobTracker>,
}

impl CoordinatorState {
    pub fn new(tracker: Arc<JobTracker>, event_tx: broadcast::Sender<PipelineEvent>) -> Self {
        Self {
            campaigns: BTreeMap::new(),
            event_tx,
            tracker,
        }
    }

    fn broadcast(&self, event: PipelineEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Fold a job event into its campaign.
    fn apply(&mut self, event: StageJobEvent) {
        self.broadcast(PipelineEvent::JobStatusChanged {
            job: event.clone(),
            timestamp: Utc::now(),
        });

        let Some(campaign) = self.campaigns.get(&event.campaign_id) else {
            tracing::warn!(
                campaign_id = %event.campaign_id,
                job_id = %event.job_id,
                "Job event for unknown campaign dropped"
            );
            return;
        };

        let (next, outcome) = advance(campaign, &event);
        match outcome {
            Advance::Applied { from, to } => {
                if from != to {
                    tracing::info!(
                        campaign_id = %next.id,
                        job_id = %event.job_id,
                        %from,
                        %to,
                        "Campaign advanced"
                    );
                    self.broadcast(PipelineEvent::CampaignStatusChanged {
                        campaign_id: next.id,
                        old_status: from,
                        new_status: to,
                        status_error: next.status_error.clone(),
                        timestamp: next.updated_at,
                    });
                }
                self.campaigns.insert(next.id, next);
            }
            Advance::AlreadyApplied => {
                tracing::debug!(job_id = %event.job_id, status = %event.status, "Job event already applied");
            }
            Advance::Discarded(reason) => {
                tracing::debug!(job_id = %event.job_id, ?reason, "Job event discarded");
            }
            Advance::Rejected(violation) => {
                tracing::error!(
                    campaign_id = %event.campaign_id,
                    job_id = %event.job_id,
                    %violation,
                    "Job event violates pipeline order"
                );
                self.broadcast(PipelineEvent::EventRejected {
                    campaign_id: event.campaign_id,
                    job_id: event.job_id,
                    reason: violation.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
    }
}

/// Coordinator actor arguments.
pub struct CoordinatorArgs {
    pub tracker: Arc<JobTracker>,
    /// Receiving end of the tracker's event channel.
    pub events: mpsc::UnboundedReceiver<StageJobEvent>,
    pub event_tx: broadcast::Sender<PipelineEvent>,
}

/// Coordinator actor that exclusively owns campaign state.
pub struct CampaignCoordinator;

impl Actor for CampaignCoordinator {
    type Msg = CoordinatorMessage;
    type State = CoordinatorState;
    type Arguments = CoordinatorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting campaign coordinator");

        // Forward tracker events into the mailbox in the order they were emitted
        let mut events = args.events;
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if myself_clone
                    .send_message(CoordinatorMessage::JobStatusChanged(event))
                    .is_err()
                {
                    break;
                }
            }
        });

        Ok(CoordinatorState::new(args.tracker, args.event_tx))
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            CoordinatorMessage::CreateCampaign { name, reply } => {
                let name = name.trim();
                if name.is_empty() {
                    let _ = reply.send(Err(CoordinatorError::EmptyName));
                    return Ok(());
                }

                let campaign = Campaign::new(name);
                tracing::info!(campaign_id = %campaign.id, name = %campaign.name, "Campaign created");
                state.campaigns.insert(campaign.id, campaign.clone());

                state.broadcast(PipelineEvent::CampaignCreated {
                    campaign: campaign.clone(),
                    timestamp: campaign.created_at,
                });

                let _ = reply.send(Ok(campaign));
            }

            CoordinatorMessage::GetCampaign { campaign_id, reply } => {
                let _ = reply.send(state.campaigns.get(&campaign_id).cloned());
            }

            CoordinatorMessage::ListCampaigns { reply } => {
                let _ = reply.send(state.campaigns.values().cloned().collect());
            }

            CoordinatorMessage::DeleteCampaign { campaign_id, reply } => {
                if !state.campaigns.contains_key(&campaign_id) {
                    let _ = reply.send(Err(CoordinatorError::CampaignNotFound(campaign_id)));
                } else if state.tracker.has_live_jobs(campaign_id) {
                    let _ = reply.send(Err(CoordinatorError::LiveJobs(campaign_id)));
                } else {
                    state.campaigns.remove(&campaign_id);
                    tracing::info!(%campaign_id, "Campaign deleted");
                    let _ = reply.send(Ok(()));
                }
            }

            CoordinatorMessage::JobStatusChanged(event) => {
                state.apply(event);
            }

            CoordinatorMessage::Shutdown => {
                tracing::info!("Shutting down campaign coordinator");
                myself.stop(None);
            }
        }

        Ok(())
    }
}

/// Start a coordinator fed by `tracker`'s event channel.
pub async fn start_coordinator(
    tracker: Arc<JobTracker>,
    events: mpsc::UnboundedReceiver<StageJobEvent>,
    event_tx: broadcast::Sender<PipelineEvent>,
) -> Result<(ActorRef<CoordinatorMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    let args = CoordinatorArgs {
        tracker,
        events,
        event_tx,
    };
    Actor::spawn(None, CampaignCoordinator, args).await
}
