//! Runtime components of the campaign pipeline.
//!
//! # Architecture
//!
//! - `NetworkMonitor` - Tracks connectivity and defers work until online
//! - `CircuitBreaker` - Process-wide admission gate over job submission
//! - `RetryExecutor` - Backoff around broker calls, breaker and offline aware
//! - `JobTracker` - Owns the lifecycle of individual stage jobs
//! - `StageDispatcher` - Submits stage jobs to the broker and follows them
//! - `CampaignCoordinator` - Ractor actor that owns all campaigns
//!
//! # Usage
//!
//! ```ignore
//! use actors::{JobTracker, CoordinatorMessage, start_coordinator};
//!
//! let (tracker, events) = JobTracker::new();
//! let (event_tx, _) = tokio::sync::broadcast::channel(1024);
//! let (coordinator, handle) = start_coordinator(Arc::new(tracker), events, event_tx).await?;
//!
//! coordinator.send_message(CoordinatorMessage::CreateCampaign { ... })?;
//! ```

mod breaker;
mod broker;
mod coordinator;
mod dispatcher;
mod messages;
mod network;
mod retry;
mod tracker;

pub use breaker::{Admission, BreakerTransition, CircuitBreaker};
pub use broker::{BrokerFuture, BrokerResult, JobBroker, JobRequest, TaskState};
pub use coordinator::{CampaignCoordinator, CoordinatorArgs, CoordinatorState, start_coordinator};
pub use dispatcher::{DISPATCH_CANCELLED, DispatchError, StageDispatcher, TASK_REVOKED};
pub use messages::{CoordinatorError, CoordinatorMessage};
pub use network::{
    CallbackError, Connectivity, ConnectivityChange, ConnectivitySignal, NetworkMonitor,
    OnlineWaiter, RegistrationId,
};
pub use retry::{RetryCondition, RetryError, RetryExecutor, RetryHandle};
pub use tracker::{DEFAULT_CANCEL_REASON, JobLease, JobTracker, TrackerError};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
