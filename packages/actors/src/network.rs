//! Connectivity tracking and deferral of work until the backend is reachable.
//!
//! The monitor does not detect connectivity itself. An external source feeds it
//! [`ConnectivitySignal`]s, either directly through
//! [`NetworkMonitor::set_connectivity`] or as a stream via
//! [`NetworkMonitor::attach`].

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use campaign_core::PipelineEvent;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use tokio::sync::{broadcast, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Error returned by a deferred callback.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

type OnlineCallback = Box<dyn FnOnce() -> Result<(), CallbackError> + Send>;

/// Handle for a callback waiting in the online queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

/// A connectivity reading from the external source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivitySignal {
    pub online: bool,
    pub slow: bool,
}

impl ConnectivitySignal {
    pub fn online() -> Self {
        Self {
            online: true,
            slow: false,
        }
    }

    pub fn offline() -> Self {
        Self {
            online: false,
            slow: false,
        }
    }

    /// Online, but on a degraded link.
    pub fn slow() -> Self {
        Self {
            online: true,
            slow: true,
        }
    }
}

/// A connectivity transition, as delivered to [`NetworkMonitor::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityChange {
    pub was_online: bool,
    pub online: bool,
    pub slow: bool,
    pub at: DateTime<Utc>,
}

/// Current connectivity as seen by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connectivity {
    pub is_online: bool,
    pub is_slow_connection: bool,
    /// Last moment the monitor knew it was online.
    pub last_online_at: Option<DateTime<Utc>>,
}

struct MonitorState {
    connectivity: Connectivity,
    queue: VecDeque<(RegistrationId, OnlineCallback)>,
    next_id: u64,
}

/// Tracks online/offline/slow state and runs deferred work once online.
pub struct NetworkMonitor {
    state: Mutex<MonitorState>,
    watch_tx: watch::Sender<Connectivity>,
    change_tx: broadcast::Sender<ConnectivityChange>,
    event_tx: Option<broadcast::Sender<PipelineEvent>>,
}

impl NetworkMonitor {
    /// Create a monitor with the given initial connectivity.
    pub fn new(initially_online: bool) -> Self {
        let connectivity = Connectivity {
            is_online: initially_online,
            is_slow_connection: false,
            last_online_at: initially_online.then(Utc::now),
        };
        let (watch_tx, _) = watch::channel(connectivity.clone());
        let (change_tx, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(MonitorState {
                connectivity,
                queue: VecDeque::new(),
                next_id: 0,
            }),
            watch_tx,
            change_tx,
            event_tx: None,
        }
    }

    /// Set the event broadcaster.
    pub fn with_event_tx(mut self, tx: broadcast::Sender<PipelineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Connectivity {
        self.lock().connectivity.clone()
    }

    pub fn is_online(&self) -> bool {
        self.lock().connectivity.is_online
    }

    pub fn is_slow_connection(&self) -> bool {
        self.lock().connectivity.is_slow_connection
    }

    pub fn last_online_at(&self) -> Option<DateTime<Utc>> {
        let state = self.lock();
        if state.connectivity.is_online {
            Some(Utc::now())
        } else {
            state.connectivity.last_online_at
        }
    }

    /// Receiver that observes every connectivity change.
    pub fn watch(&self) -> watch::Receiver<Connectivity> {
        self.watch_tx.subscribe()
    }

    /// Transition events, one per accepted change.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityChange> {
        self.change_tx.subscribe()
    }

    /// Number of callbacks waiting for connectivity.
    pub fn pending_callbacks(&self) -> usize {
        self.lock().queue.len()
    }

    /// Apply a reading from the connectivity source.
    ///
    /// When the monitor goes from offline to online, every queued callback runs
    /// in enqueue order. Callbacks run on the caller's task and must not block.
    pub fn set_connectivity(&self, signal: ConnectivitySignal) {
        let now = Utc::now();
        let (was_online, changed, drained) = {
            let mut state = self.lock();
            let previous = state.connectivity.clone();
            if previous.is_online == signal.online && previous.is_slow_connection == signal.slow {
                return;
            }

            state.connectivity.is_online = signal.online;
            state.connectivity.is_slow_connection = signal.online && signal.slow;
            if signal.online || previous.is_online {
                state.connectivity.last_online_at = Some(now);
            }
            self.watch_tx.send_replace(state.connectivity.clone());

            let drained: Vec<_> = if signal.online && !previous.is_online {
                state.queue.drain(..).collect()
            } else {
                Vec::new()
            };
            (previous.is_online, state.connectivity.clone(), drained)
        };

        match (changed.is_online, changed.is_slow_connection) {
            (false, _) => tracing::warn!("Connectivity lost; deferring broker work"),
            (true, slow) => tracing::info!(
                slow,
                queued = drained.len(),
                "Connectivity available"
            ),
        }

        let _ = self.change_tx.send(ConnectivityChange {
            was_online,
            online: changed.is_online,
            slow: changed.is_slow_connection,
            at: now,
        });
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(PipelineEvent::ConnectivityChanged {
                online: changed.is_online,
                slow: changed.is_slow_connection,
                timestamp: now,
            });
        }

        for (id, callback) in drained {
            run_callback(Some(id), callback);
        }
    }

    /// Run `callback` once connectivity is available.
    ///
    /// Runs immediately and returns `None` when already online. Otherwise the
    /// callback is queued behind earlier ones and its registration is returned
    /// so it can be withdrawn with [`NetworkMonitor::cancel`].
    pub fn execute_when_online<F>(&self, callback: F) -> Option<RegistrationId>
    where
        F: FnOnce() -> Result<(), CallbackError> + Send + 'static,
    {
        {
            let mut state = self.lock();
            if !state.connectivity.is_online {
                let id = RegistrationId(state.next_id);
                state.next_id += 1;
                state.queue.push_back((id, Box::new(callback)));
                tracing::debug!(registration = id.0, queued = state.queue.len(), "Deferred until online");
                return Some(id);
            }
        }

        run_callback(None, callback);
        None
    }

    /// Withdraw a queued callback. Returns `false` if it already ran or was
    /// withdrawn.
    pub fn cancel(&self, id: RegistrationId) -> bool {
        let mut state = self.lock();
        let before = state.queue.len();
        state.queue.retain(|(queued, _)| *queued != id);
        before != state.queue.len()
    }

    /// A future-backed registration in the online queue that resolves once the
    /// monitor is online. Dropping the waiter withdraws the registration.
    pub fn wait_until_online(self: &Arc<Self>) -> OnlineWaiter {
        let (tx, rx) = oneshot::channel();
        let registration = self.execute_when_online(move || {
            let _ = tx.send(());
            Ok(())
        });
        OnlineWaiter {
            monitor: Arc::clone(self),
            registration,
            rx,
        }
    }

    /// Feed the monitor from an external connectivity stream until the stream
    /// ends or the returned token is cancelled.
    pub fn attach<S>(self: &Arc<Self>, source: S) -> CancellationToken
    where
        S: Stream<Item = ConnectivitySignal> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let monitor = Arc::clone(self);

        tokio::spawn(async move {
            let mut source = std::pin::pin!(source);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    signal = source.next() => match signal {
                        Some(signal) => monitor.set_connectivity(signal),
                        None => break,
                    },
                }
            }
            tracing::debug!("Connectivity source detached");
        });

        cancel
    }
}

/// Pending wait for connectivity, registered in the monitor's online queue.
pub struct OnlineWaiter {
    monitor: Arc<NetworkMonitor>,
    registration: Option<RegistrationId>,
    rx: oneshot::Receiver<()>,
}

impl OnlineWaiter {
    /// The queue registration, or `None` if the monitor was already online.
    pub fn registration(&self) -> Option<RegistrationId> {
        self.registration
    }

    /// Suspend until the monitor reports online.
    pub async fn wait(mut self) {
        let _ = (&mut self.rx).await;
        self.registration = None;
    }
}

impl Drop for OnlineWaiter {
    fn drop(&mut self) {
        if let Some(id) = self.registration.take() {
            self.monitor.cancel(id);
        }
    }
}

/// Run one callback, logging its error or panic.
fn run_callback<F>(registration: Option<RegistrationId>, callback: F)
where
    F: FnOnce() -> Result<(), CallbackError>,
{
    let registration = registration.map(|id| id.0);
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => {}
        Ok(Err(error)) => tracing::warn!(registration, %error, "Deferred callback failed"),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|message| message.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(registration, panic = %message, "Deferred callback panicked");
        }
    }
}
