//! Bounded exponential backoff around broker calls, gated by the circuit
//! breaker and suspended while the network monitor reports offline.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use campaign_core::{BrokerError, RetryPolicy};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::breaker::{Admission, CircuitBreaker};
use crate::network::{Connectivity, NetworkMonitor, RegistrationId};

/// Decides whether a failed attempt is worth retrying.
pub type RetryCondition = Arc<dyn Fn(&BrokerError) -> bool + Send + Sync>;

/// Why a retried operation gave up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    /// The breaker refused admission. Never retried here.
    #[error("Circuit breaker is open; retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: BrokerError },

    /// The failure is not retryable.
    #[error(transparent)]
    Permanent(BrokerError),

    #[error("Operation cancelled")]
    Cancelled,
}

struct HandleInner {
    token: CancellationToken,
    attempts: AtomicU32,
    suspended: AtomicBool,
    registration: Mutex<Option<(Arc<NetworkMonitor>, RegistrationId)>>,
}

/// Caller-side control over one retry sequence.
///
/// Clones share the same sequence. [`RetryHandle::cancel`] aborts a pending
/// backoff timer and withdraws a pending offline registration before it
/// returns.
#[derive(Clone)]
pub struct RetryHandle {
    inner: Arc<HandleInner>,
}

impl Default for RetryHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RetryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryHandle")
            .field("cancelled", &self.is_cancelled())
            .field("attempts", &self.attempts())
            .field("suspended", &self.is_suspended())
            .finish()
    }
}

impl RetryHandle {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// A handle cancelled together with `token`.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                token,
                attempts: AtomicU32::new(0),
                suspended: AtomicBool::new(false),
                registration: Mutex::new(None),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.token.cancel();
        let registration = self
            .inner
            .registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((monitor, id)) = registration {
            monitor.cancel(id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Failed attempts of the current sequence.
    pub fn attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Whether the sequence is parked until connectivity returns.
    pub fn is_suspended(&self) -> bool {
        self.inner.suspended.load(Ordering::SeqCst)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    fn set_registration(&self, monitor: &Arc<NetworkMonitor>, id: RegistrationId) {
        *self
            .inner
            .registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((Arc::clone(monitor), id));
    }

    fn clear_registration(&self) {
        self.inner
            .registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Runs broker operations under the retry policy.
pub struct RetryExecutor {
    policy: RetryPolicy,
    condition: RetryCondition,
    breaker: Arc<CircuitBreaker>,
    monitor: Arc<NetworkMonitor>,
}

impl RetryExecutor {
    /// Executor that retries transient broker failures.
    pub fn new(policy: RetryPolicy, breaker: Arc<CircuitBreaker>, monitor: Arc<NetworkMonitor>) -> Self {
        Self {
            policy,
            condition: Arc::new(BrokerError::is_transient),
            breaker,
            monitor,
        }
    }

    /// Replace the retry condition.
    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&BrokerError) -> bool + Send + Sync + 'static,
    {
        self.condition = Arc::new(condition);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn monitor(&self) -> &Arc<NetworkMonitor> {
        &self.monitor
    }

    /// Run `op` until it succeeds, fails permanently, exhausts the policy or
    /// `handle` is cancelled. `op` receives the zero-based attempt number.
    ///
    /// Admission is checked before every attempt. Transient failures count
    /// against the breaker; any other answer from the broker counts as a
    /// success for it.
    pub async fn run<T, F, Fut>(&self, handle: &RetryHandle, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        let mut attempt: u32 = 0;
        handle.inner.attempts.store(0, Ordering::SeqCst);

        loop {
            if handle.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let probe = match self.breaker.admit() {
                Admission::Allow => None,
                Admission::Probe => Some(ProbeSlot::new(&self.breaker)),
                Admission::Reject { retry_after } => {
                    tracing::debug!(attempt, ?retry_after, "Submission rejected by open breaker");
                    return Err(RetryError::CircuitOpen { retry_after });
                }
            };

            let outcome = tokio::select! {
                biased;
                _ = handle.token().cancelled() => return Err(RetryError::Cancelled),
                outcome = op(attempt) => outcome,
            };

            let error = match outcome {
                Ok(value) => {
                    self.record(probe, true, None);
                    return Ok(value);
                }
                Err(error) => error,
            };

            let transient = error.is_transient();
            let message = error.to_string();
            self.record(probe, !transient, Some(&message));

            let failed = attempt + 1;
            handle.inner.attempts.store(failed, Ordering::SeqCst);

            if !(self.condition)(&error) {
                tracing::debug!(attempt, %error, "Failure is not retryable");
                return Err(RetryError::Permanent(error));
            }
            if attempt >= self.policy.max_retries {
                tracing::warn!(attempts = failed, %error, "Retries exhausted");
                return Err(RetryError::RetriesExhausted {
                    attempts: failed,
                    last: error,
                });
            }

            let delay = self.policy.delay_for_attempt(attempt);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, %error, "Scheduling retry");
            self.pause(handle, delay).await?;
            attempt = failed;
        }
    }

    fn record(&self, probe: Option<ProbeSlot<'_>>, success: bool, error: Option<&str>) {
        match probe {
            Some(slot) => slot.settle(success, error),
            None => self.breaker.record_outcome(success, error),
        }
    }

    /// Serve `delay` while online. Losing connectivity parks the sequence in
    /// the monitor's queue; once back online the full delay starts over.
    async fn pause(&self, handle: &RetryHandle, delay: Duration) -> Result<(), RetryError> {
        let mut connectivity = self.monitor.watch();
        loop {
            let online = connectivity.borrow_and_update().is_online;
            if !online {
                self.suspend(handle).await?;
                continue;
            }

            tokio::select! {
                biased;
                _ = handle.token().cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => return Ok(()),
                _ = went_offline(&mut connectivity) => {
                    tracing::debug!("Connectivity lost during backoff");
                }
            }
        }
    }

    async fn suspend(&self, handle: &RetryHandle) -> Result<(), RetryError> {
        let waiter = self.monitor.wait_until_online();
        if let Some(id) = waiter.registration() {
            handle.set_registration(&self.monitor, id);
        }
        handle.inner.suspended.store(true, Ordering::SeqCst);
        tracing::info!(attempts = handle.attempts(), "Offline; retries suspended until connectivity returns");

        let result = tokio::select! {
            biased;
            _ = handle.token().cancelled() => Err(RetryError::Cancelled),
            _ = waiter.wait() => Ok(()),
        };

        handle.inner.suspended.store(false, Ordering::SeqCst);
        handle.clear_registration();
        result
    }
}

/// An admitted recovery probe. Dropped without an outcome, e.g. when the
/// attempt is cancelled or its future is dropped, it hands the slot back.
struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl<'a> ProbeSlot<'a> {
    fn new(breaker: &'a CircuitBreaker) -> Self {
        Self {
            breaker,
            settled: false,
        }
    }

    fn settle(mut self, success: bool, error: Option<&str>) {
        self.settled = true;
        self.breaker.record_probe_outcome(success, error);
    }
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!("Recovery probe abandoned; releasing slot");
            self.breaker.release_probe();
        }
    }
}

async fn went_offline(rx: &mut watch::Receiver<Connectivity>) {
    loop {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        if !rx.borrow_and_update().is_online {
            return;
        }
    }
}
