//! In-process telemetry bus backed by a `tokio::sync::broadcast` channel.
//!
//! The orchestrator publishes lifecycle facts here (boot finished, project
//! mounted, runtime change handled); the status transport and error sink
//! subscribe. Publishing never blocks and never fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use switchyard_core::types::ProjectId;
use tokio::sync::broadcast;

/// Well-known event names.
pub mod names {
    pub const APP_STARTED: &str = "app.started";
    pub const PROJECT_MOUNTED: &str = "project.mounted";
    pub const PROJECT_UNMOUNTED: &str = "project.unmounted";
    pub const RUNTIME_CHANGE: &str = "runtime.change";
    pub const RUNTIME_CHANGE_FAILED: &str = "runtime.change_failed";
    pub const ENV_SWITCHED: &str = "env.switched";
}

// ---------------------------------------------------------------------------
// PlatformEvent
// ---------------------------------------------------------------------------

/// A lifecycle fact about the running platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformEvent {
    /// Dot-separated event name, e.g. `"project.mounted"`.
    pub event_type: String,

    /// Project the event concerns, if any.
    pub project_id: Option<ProjectId>,

    pub payload: serde_json::Value,

    pub timestamp: DateTime<Utc>,
}

impl PlatformEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            project_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn for_project(mut self, project_id: impl Into<ProjectId>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

const DEFAULT_CAPACITY: usize = 256;

/// Fan-out bus; share it as `Arc<EventBus>`.
pub struct EventBus {
    sender: broadcast::Sender<PlatformEvent>,
}

impl EventBus {
    /// Slow receivers observe `RecvError::Lagged` once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: PlatformEvent) {
        // Zero receivers is not an error.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlatformEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
