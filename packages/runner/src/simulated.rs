//! In-process stand-ins for the job broker and the connectivity source.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use actors::{BrokerFuture, ConnectivitySignal, JobBroker, JobRequest, TaskState};
use campaign_core::{BrokerError, JobType, StageOutput};
use futures_util::Stream;

struct Task {
    job_type: JobType,
    polls: u32,
}

/// Broker that runs every task in memory and reports canned stage results.
pub struct SimulatedBroker {
    tasks: Mutex<HashMap<String, Task>>,
    submissions: AtomicU32,
    fail_every: Option<u32>,
    running_polls: u32,
}

impl SimulatedBroker {
    pub fn new(fail_every: Option<u32>, running_polls: u32) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            submissions: AtomicU32::new(0),
            fail_every: fail_every.filter(|n| *n > 0),
            running_polls,
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JobBroker for SimulatedBroker {
    fn submit(&self, request: &JobRequest) -> BrokerFuture<String> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        let result = if self.fail_every.is_some_and(|every| n % every == 0) {
            tracing::debug!(job_id = %request.job_id, submission = n, "Simulated broker refusing submission");
            Err(BrokerError::status(503, "simulated broker overloaded"))
        } else {
            let task_id = format!("sim-{}", request.job_id);
            self.tasks().insert(
                task_id.clone(),
                Task {
                    job_type: request.job_type,
                    polls: 0,
                },
            );
            Ok(task_id)
        };
        Box::pin(async move { result })
    }

    fn poll(&self, task_id: &str) -> BrokerFuture<TaskState> {
        let result = match self.tasks().get_mut(task_id) {
            None => Err(BrokerError::status(404, format!("unknown task {task_id}"))),
            Some(task) if task.polls < self.running_polls => {
                task.polls += 1;
                Ok(TaskState::Running)
            }
            Some(task) => Ok(TaskState::Succeeded(output_for(task.job_type))),
        };
        Box::pin(async move { result })
    }
}

fn output_for(job_type: JobType) -> StageOutput {
    match job_type {
        JobType::FetchLeads => StageOutput::FetchLeads { leads_found: 120 },
        JobType::VerifyEmails => StageOutput::VerifyEmails {
            verified: 104,
            rejected: 16,
        },
        JobType::EnrichLead => StageOutput::EnrichLead { enriched: 98 },
        JobType::GenerateEmails => StageOutput::GenerateEmails { drafted: 98 },
        JobType::CleanupCampaign => StageOutput::CleanupCampaign { removed: 0 },
    }
}

/// Connectivity source that reports an outage of `duration`, then recovery.
pub fn outage(duration: Duration) -> impl Stream<Item = ConnectivitySignal> + Send + 'static {
    futures_util::stream::unfold(0u8, move |step| async move {
        match step {
            0 => Some((ConnectivitySignal::offline(), 1)),
            1 => {
                tokio::time::sleep(duration).await;
                Some((ConnectivitySignal::online(), 2))
            }
            _ => None,
        }
    })
}
