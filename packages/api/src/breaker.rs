//! Circuit breaker status and operator overrides.

use campaign_core::CircuitBreakerStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::init::PipelineApi;

/// Operator action on the submission breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakerAction {
    Open,
    Close,
}

/// Request body of the breaker override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerOverride {
    pub action: BreakerAction,
    #[serde(default)]
    pub note: Option<String>,
}

/// Breaker status before and after an override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerOverrideResponse {
    pub before: CircuitBreakerStatus,
    pub after: CircuitBreakerStatus,
    pub timestamp: DateTime<Utc>,
}

impl PipelineApi {
    /// Current breaker status.
    pub fn breaker_status(&self) -> CircuitBreakerStatus {
        self.inner.breaker.status()
    }

    /// Force the breaker open or closed.
    pub fn override_breaker(&self, request: BreakerOverride) -> BreakerOverrideResponse {
        let before = self.inner.breaker.status();
        let note = request.note.as_deref();
        tracing::info!(action = ?request.action, note, "Breaker override");
        let after = match request.action {
            BreakerAction::Open => self.inner.breaker.force_open(note),
            BreakerAction::Close => self.inner.breaker.reset(note),
        };
        BreakerOverrideResponse {
            before,
            after,
            timestamp: Utc::now(),
        }
    }
}
