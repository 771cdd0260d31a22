//! Pipeline initialization.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use actors::{
    ActorRef, CircuitBreaker, CoordinatorMessage, JobBroker, JobTracker, NetworkMonitor,
    RetryExecutor, RetryHandle, RpcReplyPort, StageDispatcher, concurrency, start_coordinator,
};
use campaign_core::{CampaignId, PipelineConfig, PipelineEvent};
use tokio::sync::broadcast;

use crate::error::{ApiError, InitError};

/// Capacity of the pipeline event channel.
const EVENT_CAPACITY: usize = 1024;

pub(crate) struct Inner {
    pub(crate) config: PipelineConfig,
    pub(crate) coordinator: ActorRef<CoordinatorMessage>,
    pub(crate) tracker: Arc<JobTracker>,
    pub(crate) breaker: Arc<CircuitBreaker>,
    pub(crate) monitor: Arc<NetworkMonitor>,
    pub(crate) dispatcher: Arc<StageDispatcher>,
    pub(crate) event_tx: broadcast::Sender<PipelineEvent>,
    /// Campaigns with a dispatch in flight.
    pub(crate) running: Mutex<HashMap<CampaignId, RetryHandle>>,
}

/// Handle to a running pipeline. Cheap to clone.
#[derive(Clone)]
pub struct PipelineApi {
    pub(crate) inner: Arc<Inner>,
}

/// Start the pipeline: coordinator actor, tracker, breaker, network monitor
/// and dispatcher, all wired to one event channel.
///
/// The network monitor starts online; feed it through
/// [`PipelineApi::connectivity`].
pub async fn init_pipeline(config: PipelineConfig, broker: Arc<dyn JobBroker>) -> Result<PipelineApi, InitError> {
    config.validate()?;
    tracing::info!("Initializing campaign pipeline...");

    let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
    let (tracker, events) = JobTracker::new();
    let tracker = Arc::new(tracker);
    let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()).with_event_tx(event_tx.clone()));
    let monitor = Arc::new(NetworkMonitor::new(true).with_event_tx(event_tx.clone()));
    let executor = Arc::new(RetryExecutor::new(
        config.retry.clone(),
        breaker.clone(),
        monitor.clone(),
    ));
    let dispatcher = Arc::new(StageDispatcher::new(
        tracker.clone(),
        broker,
        executor,
        config.dispatch.clone(),
    ));

    let (coordinator, _handle) = start_coordinator(tracker.clone(), events, event_tx.clone())
        .await
        .map_err(|e| InitError::Coordinator(e.to_string()))?;

    tracing::info!(
        failure_threshold = config.breaker.failure_threshold,
        cooldown_ms = config.breaker.cooldown_ms,
        max_retries = config.retry.max_retries,
        "Campaign pipeline initialized"
    );

    Ok(PipelineApi {
        inner: Arc::new(Inner {
            config,
            coordinator,
            tracker,
            breaker,
            monitor,
            dispatcher,
            event_tx,
            running: Mutex::new(HashMap::new()),
        }),
    })
}

impl PipelineApi {
    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Cancel in-flight dispatches and stop the coordinator.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down campaign pipeline");
        for (_, handle) in self.running().drain() {
            handle.cancel();
        }
        let _ = self.inner.coordinator.send_message(CoordinatorMessage::Shutdown);
    }

    pub(crate) fn running(&self) -> MutexGuard<'_, HashMap<CampaignId, RetryHandle>> {
        self.inner.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send a request to the coordinator and wait for its reply.
    pub(crate) async fn call<T>(
        &self,
        build: impl FnOnce(RpcReplyPort<T>) -> CoordinatorMessage,
    ) -> Result<T, ApiError>
    where
        T: Send + 'static,
    {
        let (tx, rx) = concurrency::oneshot();
        self.inner
            .coordinator
            .send_message(build(tx.into()))
            .map_err(|e| ApiError::Coordinator(format!("Failed to send message: {}", e)))?;

        rx.await
            .map_err(|_| ApiError::Coordinator("Failed to receive response".into()))
    }
}
