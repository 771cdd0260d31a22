//! Process-wide admission gate over job submission.
//!
//! Closed admits every submission. Open rejects fast until the cooldown has
//! elapsed, then lets exactly one probe through; the probe's outcome closes
//! the breaker or refreshes `opened_at`.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use campaign_core::{BreakerConfig, CircuitBreakerStatus, CircuitState, OpenReason, PipelineEvent};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker closed; go ahead.
    Allow,
    /// Breaker open and cooling down is over: this caller is the single probe
    /// and must report back through [`CircuitBreaker::record_probe_outcome`]
    /// or [`CircuitBreaker::release_probe`].
    Probe,
    /// Breaker open; try again after `retry_after`.
    Reject { retry_after: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Admission::Reject { .. })
    }
}

/// A breaker state change, published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerTransition {
    pub from: CircuitState,
    pub to: CircuitState,
    /// Cause when the breaker (re)opened.
    pub reason: Option<OpenReason>,
    pub status: CircuitBreakerStatus,
    pub at: DateTime<Utc>,
}

struct BreakerState {
    status: CircuitBreakerStatus,
    opened_instant: Option<Instant>,
    window: VecDeque<bool>,
    last_stamp: Option<DateTime<Utc>>,
}

impl BreakerState {
    /// Wall-clock stamp that never goes backwards.
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn push_outcome(&mut self, config: &BreakerConfig, success: bool) {
        if config.window_size == 0 {
            return;
        }
        if self.window.len() == config.window_size {
            self.window.pop_front();
        }
        self.window.push_back(success);
        self.status.metadata.window_failure_rate = self.failure_rate(config);
    }

    fn failure_rate(&self, config: &BreakerConfig) -> Option<f64> {
        if self.window.is_empty() || self.window.len() < config.min_window_samples {
            return None;
        }
        let failures = self.window.iter().filter(|ok| !**ok).count();
        Some(failures as f64 / self.window.len() as f64)
    }

    fn open(&mut self, reason: OpenReason, now: Instant) -> BreakerTransition {
        let from = self.status.state;
        let at = self.stamp();
        self.status.state = CircuitState::Open;
        self.status.opened_at = Some(at);
        self.status.metadata.open_reason = Some(reason.clone());
        self.status.metadata.probe_in_flight = false;
        if from == CircuitState::Closed {
            self.status.metadata.trips += 1;
        }
        self.opened_instant = Some(now);
        BreakerTransition {
            from,
            to: CircuitState::Open,
            reason: Some(reason),
            status: self.status.clone(),
            at,
        }
    }

    fn close(&mut self) -> BreakerTransition {
        let from = self.status.state;
        let at = self.stamp();
        let metadata = &mut self.status.metadata;
        metadata.consecutive_failures = 0;
        metadata.total_failures = 0;
        metadata.total_successes = 0;
        metadata.window_failure_rate = None;
        metadata.last_error = None;
        metadata.probe_in_flight = false;
        self.status.state = CircuitState::Closed;
        self.status.closed_at = Some(at);
        self.opened_instant = None;
        self.window.clear();
        BreakerTransition {
            from,
            to: CircuitState::Closed,
            reason: None,
            status: self.status.clone(),
            at,
        }
    }

    fn record(&mut self, config: &BreakerConfig, success: bool, error: Option<&str>) {
        let metadata = &mut self.status.metadata;
        if success {
            metadata.consecutive_failures = 0;
            metadata.total_successes += 1;
        } else {
            metadata.consecutive_failures += 1;
            metadata.total_failures += 1;
            metadata.last_error = Some(error.unwrap_or("submission failed").to_string());
        }
        self.push_outcome(config, success);
    }
}

/// Submission circuit breaker. Construct once and share through `Arc`.
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<BreakerState>,
    transitions: broadcast::Sender<BreakerTransition>,
    event_tx: Option<broadcast::Sender<PipelineEvent>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        let (transitions, _) = broadcast::channel(64);
        Self {
            config,
            state: Mutex::new(BreakerState {
                status: CircuitBreakerStatus::default(),
                opened_instant: None,
                window: VecDeque::new(),
                last_stamp: None,
            }),
            transitions,
            event_tx: None,
        }
    }

    /// Set the event broadcaster.
    pub fn with_event_tx(mut self, tx: broadcast::Sender<PipelineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// The only place breaker state is mutated. `f` runs with the lock held
    /// and any transition it returns is published before the lock is released,
    /// so subscribers observe transitions in the order they happened.
    fn transition<R>(
        &self,
        f: impl FnOnce(&mut BreakerState, Instant) -> (R, Option<BreakerTransition>),
    ) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (result, change) = f(&mut state, Instant::now());
        if let Some(change) = change {
            self.publish(change);
        }
        result
    }

    fn publish(&self, change: BreakerTransition) {
        match change.to {
            CircuitState::Open => tracing::warn!(
                from = %change.from,
                reason = ?change.reason,
                trips = change.status.metadata.trips,
                "Submission breaker opened"
            ),
            CircuitState::Closed => tracing::info!(
                from = %change.from,
                "Submission breaker closed"
            ),
        }

        if let Some(ref tx) = self.event_tx {
            let event = match change.to {
                CircuitState::Open => PipelineEvent::BreakerOpened {
                    reason: change
                        .reason
                        .clone()
                        .unwrap_or(OpenReason::Operator { note: None }),
                    status: change.status.clone(),
                    timestamp: change.at,
                },
                CircuitState::Closed => PipelineEvent::BreakerClosed {
                    status: change.status.clone(),
                    timestamp: change.at,
                },
            };
            let _ = tx.send(event);
        }
        let _ = self.transitions.send(change);
    }

    /// Decide whether a submission may proceed.
    pub fn admit(&self) -> Admission {
        let cooldown = self.config.cooldown();
        self.transition(|state, now| {
            if state.status.state == CircuitState::Closed {
                return (Admission::Allow, None);
            }

            // Callers waiting on an in-flight probe back off a full cooldown.
            if state.status.metadata.probe_in_flight {
                return (Admission::Reject { retry_after: cooldown }, None);
            }
            let elapsed = state
                .opened_instant
                .map_or(cooldown, |opened| now.saturating_duration_since(opened));
            if elapsed >= cooldown {
                state.status.metadata.probe_in_flight = true;
                tracing::info!("Admitting recovery probe");
                return (Admission::Probe, None);
            }
            (
                Admission::Reject {
                    retry_after: cooldown - elapsed,
                },
                None,
            )
        })
    }

    /// Record the outcome of an admitted, non-probe submission.
    ///
    /// While closed, failures accumulate towards the consecutive-failure and
    /// failure-rate thresholds. While open, outcomes of submissions admitted
    /// before the breaker opened only update the counters.
    pub fn record_outcome(&self, success: bool, error: Option<&str>) {
        let config = &self.config;
        self.transition(|state, now| {
            state.record(config, success, error);
            if success || state.status.state == CircuitState::Open {
                return ((), None);
            }

            let consecutive = state.status.metadata.consecutive_failures;
            if consecutive >= config.failure_threshold {
                let change = state.open(OpenReason::ConsecutiveFailures { count: consecutive }, now);
                return ((), Some(change));
            }
            if let Some(threshold) = config.failure_rate_threshold
                && let Some(rate) = state.failure_rate(config)
                && rate >= threshold
            {
                let window = state.window.len();
                let change = state.open(OpenReason::FailureRate { rate, window }, now);
                return ((), Some(change));
            }
            ((), None)
        })
    }

    /// Record the outcome of the probe admitted by [`Admission::Probe`].
    /// Success closes the breaker; failure keeps it open with a fresh
    /// `opened_at`.
    pub fn record_probe_outcome(&self, success: bool, error: Option<&str>) {
        let config = &self.config;
        self.transition(|state, now| {
            if state.status.state != CircuitState::Open || !state.status.metadata.probe_in_flight {
                state.record(config, success, error);
                return ((), None);
            }
            if success {
                return ((), Some(state.close()));
            }
            state.record(config, false, error);
            ((), Some(state.open(OpenReason::ProbeFailed, now)))
        })
    }

    /// Give back a probe slot without deciding the breaker, e.g. when the
    /// probing call was cancelled before it reached the broker.
    pub fn release_probe(&self) {
        self.transition(|state, _| {
            state.status.metadata.probe_in_flight = false;
            ((), None)
        })
    }

    /// Operator override: force the breaker closed and clear its counters.
    pub fn reset(&self, note: Option<&str>) -> CircuitBreakerStatus {
        tracing::info!(note, "Breaker reset requested");
        self.transition(|state, _| {
            let change = state.close();
            let status = state.status.clone();
            let published = (change.from == CircuitState::Open).then_some(change);
            (status, published)
        })
    }

    /// Operator override: force the breaker open.
    pub fn force_open(&self, note: Option<&str>) -> CircuitBreakerStatus {
        tracing::info!(note, "Breaker force-open requested");
        self.transition(|state, now| {
            let change = state.open(
                OpenReason::Operator {
                    note: note.map(str::to_string),
                },
                now,
            );
            (state.status.clone(), Some(change))
        })
    }

    pub fn status(&self) -> CircuitBreakerStatus {
        self.transition(|state, _| (state.status.clone(), None))
    }

    pub fn is_open(&self) -> bool {
        self.status().is_open()
    }

    /// Receive every breaker transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerTransition> {
        self.transitions.subscribe()
    }
}
