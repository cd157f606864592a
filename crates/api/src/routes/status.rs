use std::sync::Arc;

use axum::extract::State;
use axum::{routing::get, Json, Router};

use crate::telemetry::{StatusMonitor, StatusSnapshot};

/// GET /status -- platform event counters and uptime.
async fn status(State(monitor): State<Arc<StatusMonitor>>) -> Json<StatusSnapshot> {
    Json(monitor.snapshot())
}

pub fn router() -> Router<Arc<StatusMonitor>> {
    Router::new().route("/status", get(status))
}
