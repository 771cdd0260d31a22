#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{
    ActorRef, BrokerFuture, CircuitBreaker, CoordinatorMessage, JobBroker, JobRequest, JobTracker,
    NetworkMonitor, RetryExecutor, StageDispatcher, TaskState, concurrency, start_coordinator,
};
use campaign_core::{
    BreakerConfig, BrokerError, Campaign, CampaignId, CampaignStatus, DispatchConfig, JobType,
    PipelineEvent, RetryPolicy, StageOutput,
};
use tokio::sync::broadcast;

/// The payload a healthy worker would report for `job_type`.
pub fn output_for(job_type: JobType) -> StageOutput {
    match job_type {
        JobType::FetchLeads => StageOutput::FetchLeads { leads_found: 40 },
        JobType::VerifyEmails => StageOutput::VerifyEmails {
            verified: 35,
            rejected: 5,
        },
        JobType::EnrichLead => StageOutput::EnrichLead { enriched: 35 },
        JobType::GenerateEmails => StageOutput::GenerateEmails { drafted: 35 },
        JobType::CleanupCampaign => StageOutput::CleanupCampaign { removed: 0 },
    }
}

/// In-memory broker whose answers are scripted per test.
#[derive(Default)]
pub struct ScriptedBroker {
    submit_errors: Mutex<VecDeque<BrokerError>>,
    outcomes: Mutex<HashMap<JobType, TaskState>>,
    tasks: Mutex<HashMap<String, (JobType, u32)>>,
    submitted: Mutex<Vec<JobRequest>>,
    running_polls: u32,
}

impl ScriptedBroker {
    /// Tasks report `Running` this many times before finishing.
    pub fn with_running_polls(running_polls: u32) -> Self {
        Self {
            running_polls,
            ..Self::default()
        }
    }

    /// Fail the next submissions with these errors, in order.
    pub fn fail_submissions(&self, errors: impl IntoIterator<Item = BrokerError>) {
        self.submit_errors.lock().unwrap().extend(errors);
    }

    /// Finish tasks of `job_type` in `state` instead of succeeding.
    pub fn finish_with(&self, job_type: JobType, state: TaskState) {
        self.outcomes.lock().unwrap().insert(job_type, state);
    }

    pub fn submitted(&self) -> Vec<JobRequest> {
        self.submitted.lock().unwrap().clone()
    }
}

impl JobBroker for ScriptedBroker {
    fn submit(&self, request: &JobRequest) -> BrokerFuture<String> {
        let result = match self.submit_errors.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => {
                let mut submitted = self.submitted.lock().unwrap();
                submitted.push(request.clone());
                let task_id = format!("task-{}", submitted.len());
                self.tasks
                    .lock()
                    .unwrap()
                    .insert(task_id.clone(), (request.job_type, 0));
                Ok(task_id)
            }
        };
        Box::pin(async move { result })
    }

    fn poll(&self, task_id: &str) -> BrokerFuture<TaskState> {
        let mut tasks = self.tasks.lock().unwrap();
        let result = match tasks.get_mut(task_id) {
            None => Err(BrokerError::status(404, format!("unknown task {task_id}"))),
            Some((_, polls)) if *polls < self.running_polls => {
                *polls += 1;
                Ok(TaskState::Running)
            }
            Some((job_type, _)) => Ok(self
                .outcomes
                .lock()
                .unwrap()
                .get(job_type)
                .cloned()
                .unwrap_or_else(|| TaskState::Succeeded(output_for(*job_type)))),
        };
        Box::pin(async move { result })
    }
}

/// A fully wired pipeline around a scripted broker.
pub struct Harness {
    pub tracker: Arc<JobTracker>,
    pub breaker: Arc<CircuitBreaker>,
    pub monitor: Arc<NetworkMonitor>,
    pub broker: Arc<ScriptedBroker>,
    pub dispatcher: Arc<StageDispatcher>,
    pub coordinator: ActorRef<CoordinatorMessage>,
    pub event_tx: broadcast::Sender<PipelineEvent>,
}

pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_delay_ms: 100,
        backoff_multiplier: 2.0,
        max_delay_ms: 1_000,
    }
}

pub async fn harness(broker: ScriptedBroker, breaker: BreakerConfig, retry: RetryPolicy) -> Harness {
    let (event_tx, _) = broadcast::channel(1024);
    let (tracker, events) = JobTracker::new();
    let tracker = Arc::new(tracker);
    let breaker = Arc::new(CircuitBreaker::new(breaker).with_event_tx(event_tx.clone()));
    let monitor = Arc::new(NetworkMonitor::new(true).with_event_tx(event_tx.clone()));
    let executor = Arc::new(RetryExecutor::new(retry, breaker.clone(), monitor.clone()));
    let broker = Arc::new(broker);
    let dispatcher = Arc::new(StageDispatcher::new(
        tracker.clone(),
        broker.clone(),
        executor,
        DispatchConfig {
            poll_interval_ms: 50,
            max_polls: 20,
        },
    ));
    let (coordinator, _handle) = start_coordinator(tracker.clone(), events, event_tx.clone())
        .await
        .unwrap();

    Harness {
        tracker,
        breaker,
        monitor,
        broker,
        dispatcher,
        coordinator,
        event_tx,
    }
}

pub async fn default_harness() -> Harness {
    harness(ScriptedBroker::with_running_polls(1), BreakerConfig::default(), fast_retry(3)).await
}

pub async fn create_campaign(coordinator: &ActorRef<CoordinatorMessage>, name: &str) -> Campaign {
    let (tx, rx) = concurrency::oneshot();
    coordinator
        .send_message(CoordinatorMessage::CreateCampaign {
            name: name.to_string(),
            reply: tx.into(),
        })
        .unwrap();
    rx.await.unwrap().unwrap()
}

pub async fn get_campaign(coordinator: &ActorRef<CoordinatorMessage>, campaign_id: CampaignId) -> Option<Campaign> {
    let (tx, rx) = concurrency::oneshot();
    coordinator
        .send_message(CoordinatorMessage::GetCampaign {
            campaign_id,
            reply: tx.into(),
        })
        .unwrap();
    rx.await.unwrap()
}

/// Poll the coordinator until the campaign reaches `status`.
pub async fn wait_for_status(
    coordinator: &ActorRef<CoordinatorMessage>,
    campaign_id: CampaignId,
    status: CampaignStatus,
) -> Campaign {
    for _ in 0..100 {
        if let Some(campaign) = get_campaign(coordinator, campaign_id).await
            && campaign.status == status
        {
            return campaign;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("campaign {campaign_id} never reached {status}");
}
