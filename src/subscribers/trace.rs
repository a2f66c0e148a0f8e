//! # TraceWriter — `tracing` bridge
//!
//! Forwards supervisor events into the `tracing` ecosystem so deployments
//! that already collect structured logs get path-qualified supervisor
//! entries for free. Severity mapping:
//!
//! - errors (`UnitMaintenance`, `CycleRejected`, `RepositoryDown`) → `error!`
//! - anomalies (`MethodTimeout`, subscriber trouble) → `warn!`
//! - everything else → `info!`

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Subscriber that emits one `tracing` record per event.
pub struct TraceWriter;

impl TraceWriter {
    /// Construct a new [`TraceWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for TraceWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Subscribe for TraceWriter {
    async fn on_event(&self, e: &Event) {
        let path = e.path.as_ref().map(|p| p.to_string()).unwrap_or_default();
        let detail = e.detail.as_deref().unwrap_or("");
        match e.kind {
            EventKind::UnitMaintenance | EventKind::CycleRejected | EventKind::RepositoryDown => {
                tracing::error!(
                    kind = ?e.kind,
                    %path,
                    detail,
                    error = e.error.as_deref().unwrap_or(""),
                    "supervisor event"
                );
            }
            EventKind::MethodTimeout
            | EventKind::SubscriberPanicked
            | EventKind::SubscriberOverflow => {
                tracing::warn!(
                    kind = ?e.kind,
                    %path,
                    detail,
                    error = e.error.as_deref().unwrap_or(""),
                    "supervisor event"
                );
            }
            _ => {
                tracing::info!(kind = ?e.kind, %path, detail, pid = e.pid, "supervisor event");
            }
        }
    }

    fn name(&self) -> &'static str {
        "TraceWriter"
    }
}
