#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{BrokerFuture, JobBroker, JobRequest, TaskState};
use api::{CampaignStatus, JobType, PipelineApi, PipelineConfig, init_pipeline};
use campaign_core::{BrokerError, DispatchConfig, RetryPolicy, StageOutput};

/// Broker that finishes every task on its first poll unless held.
#[derive(Default)]
pub struct FakeBroker {
    tasks: Mutex<HashMap<String, JobType>>,
    hold: AtomicBool,
    unavailable: AtomicBool,
}

impl FakeBroker {
    /// Keep every task `Running` until released.
    pub fn hold(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.hold.store(false, Ordering::SeqCst);
    }

    /// Answer every submission with a 503.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn submitted(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

impl JobBroker for FakeBroker {
    fn submit(&self, request: &JobRequest) -> BrokerFuture<String> {
        let result = if self.unavailable.load(Ordering::SeqCst) {
            Err(BrokerError::status(503, "broker unavailable"))
        } else {
            let mut tasks = self.tasks.lock().unwrap();
            let task_id = format!("task-{}", tasks.len() + 1);
            tasks.insert(task_id.clone(), request.job_type);
            Ok(task_id)
        };
        Box::pin(async move { result })
    }

    fn poll(&self, task_id: &str) -> BrokerFuture<TaskState> {
        let job_type = self.tasks.lock().unwrap().get(task_id).copied();
        let result = match job_type {
            None => Err(BrokerError::status(404, format!("unknown task {task_id}"))),
            Some(_) if self.hold.load(Ordering::SeqCst) => Ok(TaskState::Running),
            Some(job_type) => Ok(TaskState::Succeeded(output_for(job_type))),
        };
        Box::pin(async move { result })
    }
}

fn output_for(job_type: JobType) -> StageOutput {
    match job_type {
        JobType::FetchLeads => StageOutput::FetchLeads { leads_found: 12 },
        JobType::VerifyEmails => StageOutput::VerifyEmails {
            verified: 10,
            rejected: 2,
        },
        JobType::EnrichLead => StageOutput::EnrichLead { enriched: 10 },
        JobType::GenerateEmails => StageOutput::GenerateEmails { drafted: 10 },
        JobType::CleanupCampaign => StageOutput::CleanupCampaign { removed: 0 },
    }
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        retry: RetryPolicy {
            max_retries: 2,
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: 1_000,
        },
        dispatch: DispatchConfig {
            poll_interval_ms: 50,
            max_polls: 1_000,
        },
        ..PipelineConfig::default()
    }
}

pub async fn setup() -> (PipelineApi, Arc<FakeBroker>) {
    let broker = Arc::new(FakeBroker::default());
    let api = init_pipeline(test_config(), broker.clone()).await.unwrap();
    (api, broker)
}

/// Poll until the campaign reaches `status`.
pub async fn wait_for_status(api: &PipelineApi, campaign_id: &str, status: CampaignStatus) {
    for _ in 0..200 {
        if api.campaign_status(campaign_id).await.unwrap().status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("campaign {campaign_id} never reached {status}");
}
