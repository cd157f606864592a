use std::sync::Arc;

use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::orchestrator::registry::Registry;

/// State for the health route.
#[derive(Clone)]
pub struct HealthState {
    pub env: String,
    pub registry: Arc<Registry>,
}

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Active environment.
    pub env: String,
    /// Number of registered project builders.
    pub projects: usize,
}

/// GET /health
async fn health_check(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        env: state.env,
        projects: state.registry.len().await,
    })
}

/// Mount health check routes at the frame root.
pub fn router() -> Router<HealthState> {
    Router::new().route("/health", get(health_check))
}
