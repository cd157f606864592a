//! The administrative dashboard mount.
//!
//! Rebuilt from scratch whenever the environment switches, so everything it
//! holds comes from the configuration it was built with.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use switchyard_core::config::PlatformConfig;
use switchyard_events::change::api;
use switchyard_events::{ChangeError, ChangeListener, RuntimeChangeEvent};

use crate::error::{AppError, AppResult};
use crate::telemetry::StatusMonitor;

struct DashboardState {
    listener: ChangeListener,
    config_path: PathBuf,
    tool_dir: PathBuf,
    working_env: String,
    envs: Vec<String>,
}

impl DashboardState {
    /// Persist `env` as the working environment so the reload that follows
    /// picks it up. Returns the environment it replaced.
    fn write_working_env(&self, env: &str) -> AppResult<String> {
        let mut config = PlatformConfig::load(&self.config_path)?;
        if !config.envs.contains_key(env) {
            return Err(AppError::BadRequest(format!("Unknown environment '{env}'")));
        }
        let previous = std::mem::replace(&mut config.working_env, env.to_string());
        config.write(&self.config_path)?;
        tracing::info!(env, path = %self.config_path.display(), "Working environment written");
        Ok(previous)
    }

    /// Put `previous` back after the process refused the switch, so the
    /// file names the environment actually running.
    fn restore_working_env(&self, previous: &str) {
        let restored = PlatformConfig::load(&self.config_path).and_then(|mut config| {
            config.working_env = previous.to_string();
            config.write(&self.config_path)
        });
        match restored {
            Ok(()) => tracing::warn!(env = previous, "Working environment restored after rejected switch"),
            Err(e) => tracing::error!(env = previous, error = %e, "Failed to restore working environment"),
        }
    }
}

pub struct AdminDashboard {
    state: Arc<DashboardState>,
    monitor: Option<Arc<StatusMonitor>>,
}

impl AdminDashboard {
    pub fn new(
        config: &PlatformConfig,
        config_path: PathBuf,
        listener: ChangeListener,
        monitor: Option<Arc<StatusMonitor>>,
    ) -> Self {
        Self {
            state: Arc::new(DashboardState {
                listener,
                config_path,
                tool_dir: config.tool_dir(),
                working_env: config.working_env.clone(),
                envs: config.envs.keys().cloned().collect(),
            }),
            monitor,
        }
    }

    /// Routes relative to the dashboard mount path.
    pub fn routes(&self) -> Router {
        let mut router = Router::new()
            .route("/", get(index))
            .route("/api", post(admin_action))
            .with_state(Arc::clone(&self.state));
        if let Some(monitor) = &self.monitor {
            router = router.merge(crate::routes::status::router().with_state(Arc::clone(monitor)));
        }
        router
    }
}

async fn index(State(state): State<Arc<DashboardState>>) -> Html<String> {
    let custom = state.tool_dir.join("dashboard").join("index.html");
    match tokio::fs::read_to_string(&custom).await {
        Ok(page) => Html(page),
        Err(_) => Html(format!(
            "<!doctype html><html><head><title>switchyard</title></head>\
             <body><h1>switchyard</h1><p>Environment: {}</p><p>Environments: {}</p></body></html>",
            state.working_env,
            state.envs.join(", ")
        )),
    }
}

/// POST /api -- `{api, project_id, args}` admin actions.
async fn admin_action(
    State(state): State<Arc<DashboardState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let Json(req) = body?;
    let action = req
        .get("api")
        .and_then(Value::as_str)
        .ok_or(ChangeError::MissingApi)?;

    let previous_env = if action == api::PROJECT_CHANGE_ENV {
        let env = req
            .pointer("/args/env")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::BadRequest("args.env is required".into()))?;
        Some(env.to_string())
    } else {
        None
    };

    let event = RuntimeChangeEvent::from_action(req, Value::Null)?;
    let previous_env = match previous_env {
        Some(env) => Some(state.write_working_env(&env)?),
        None => None,
    };

    let handled = state.listener.notify(event).await;
    let Some(previous) = previous_env else {
        return Ok(Json(json!({ "data": handled? })));
    };
    match handled {
        Ok(Some(handled)) => Ok(Json(json!({ "data": handled }))),
        Ok(None) => {
            state.restore_working_env(&previous);
            Err(AppError::BadRequest(
                "Environment switch was rejected, previous environment kept".into(),
            ))
        }
        Err(e) => {
            state.restore_working_env(&previous);
            Err(e.into())
        }
    }
}
