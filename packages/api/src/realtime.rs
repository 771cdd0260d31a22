//! Real-time event streaming.

use std::sync::Arc;

use actors::NetworkMonitor;
use campaign_core::PipelineEvent;
use futures_util::Stream;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::init::PipelineApi;

impl PipelineApi {
    /// Subscribe to the pipeline event stream.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Pipeline events as a stream. A subscriber that falls behind skips the
    /// events it missed.
    pub fn event_stream(&self) -> impl Stream<Item = PipelineEvent> + Send + 'static {
        futures_util::stream::unfold(self.subscribe_events(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event subscriber lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
    }

    /// The connectivity monitor, for feeding connectivity signals.
    pub fn connectivity(&self) -> Arc<NetworkMonitor> {
        self.inner.monitor.clone()
    }
}

/// Helper to format an event for SSE.
pub fn format_sse_event(event: &PipelineEvent) -> String {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("data: {}\n\n", json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn sse_frame_carries_tagged_json() {
        let frame = format_sse_event(&PipelineEvent::ConnectivityChanged {
            online: false,
            slow: false,
            timestamp: Utc::now(),
        });
        assert!(frame.starts_with("data: {\"event\":\"connectivity_changed\""));
        assert!(frame.ends_with("\n\n"));
    }
}
