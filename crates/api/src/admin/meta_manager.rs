//! Metadata-manager transport: `POST /api/v1/meta`.
//!
//! Project create/update actions write the `nc_projects` row here and then
//! hand the completed action to the runtime-change listener. Every other
//! action goes to the listener untouched.

use std::sync::{Arc, PoisonError, RwLock};

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use switchyard_core::config::PlatformConfig;
use switchyard_core::error::CoreError;
use switchyard_core::project::{Project, ProjectStatus};
use switchyard_core::types::new_project_id;
use switchyard_db::meta::{project_to_record, record};
use switchyard_db::{MetaScope, MetaStore, MetaTable};
use switchyard_events::change::api;
use switchyard_events::{ChangeError, ChangeListener, RuntimeChangeEvent};

use crate::error::{AppError, AppResult};

pub trait MetaManager: Send + Sync {
    /// Register the single runtime-change listener.
    fn set_listener(&self, listener: ChangeListener);

    /// Point the manager at a new active configuration.
    fn set_config(&self, config: Arc<PlatformConfig>);

    fn routes(&self) -> Router;
}

struct ManagerInner {
    meta: Arc<dyn MetaStore>,
    listener: RwLock<Option<ChangeListener>>,
    config: RwLock<Arc<PlatformConfig>>,
}

impl ManagerInner {
    fn listener(&self) -> Option<ChangeListener> {
        self.listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn config(&self) -> Arc<PlatformConfig> {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    async fn create_project(&self, req: &Value) -> AppResult<Value> {
        let args = req.get("args").unwrap_or(&Value::Null);
        let title = args
            .get("title")
            .or_else(|| args.pointer("/project/title"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::BadRequest("Project title is required".into()))?;

        let config = match args.get("config") {
            Some(config @ Value::Object(_)) => config.clone(),
            _ => json!({ "env": self.config().working_env }),
        };
        let project =
            Project::new(new_project_id(), title, ProjectStatus::Started).with_config(config);

        self.meta
            .insert_record(
                &MetaScope::global(),
                MetaTable::Projects,
                project_to_record(&project),
            )
            .await?;
        tracing::info!(project_id = %project.id, title = %project.title, "Project created");

        Ok(json!({
            "id": project.id,
            "title": project.title,
            "status": project.status,
        }))
    }

    async fn update_project(&self, req: &Value) -> AppResult<Value> {
        let project_id = req
            .get("project_id")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::BadRequest("project_id is required".into()))?;
        let args = req.get("args").unwrap_or(&Value::Null);

        let mut patch = Map::new();
        if let Some(title) = args.get("title").and_then(Value::as_str) {
            patch.insert("title".into(), json!(title));
        }
        if let Some(config @ Value::Object(_)) = args.get("config") {
            patch.insert("config".into(), config.clone());
        }
        if patch.is_empty() {
            return Err(AppError::BadRequest("Nothing to update".into()));
        }

        let updated = self
            .meta
            .update_record(
                &MetaScope::global(),
                MetaTable::Projects,
                patch,
                &record([("id", json!(project_id))]),
            )
            .await?;
        if updated == 0 {
            return Err(CoreError::NotFound {
                entity: "project",
                id: project_id.to_string(),
            }
            .into());
        }

        Ok(json!({ "id": project_id }))
    }
}

/// The metadata-manager transport.
#[derive(Clone)]
pub struct MetaApiManager {
    inner: Arc<ManagerInner>,
}

impl MetaApiManager {
    pub fn new(meta: Arc<dyn MetaStore>, config: Arc<PlatformConfig>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                meta,
                listener: RwLock::new(None),
                config: RwLock::new(config),
            }),
        }
    }

    pub fn config(&self) -> Arc<PlatformConfig> {
        self.inner.config()
    }
}

impl MetaManager for MetaApiManager {
    fn set_listener(&self, listener: ChangeListener) {
        *self
            .inner
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    fn set_config(&self, config: Arc<PlatformConfig>) {
        tracing::debug!(env = %config.working_env, "Meta manager config updated");
        *self
            .inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner) = config;
    }

    fn routes(&self) -> Router {
        Router::new()
            .route("/api/v1/meta", post(handle_action))
            .with_state(Arc::clone(&self.inner))
    }
}

async fn handle_action(
    State(inner): State<Arc<ManagerInner>>,
    body: Result<Json<Value>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let Json(req) = body?;
    let action = req
        .get("api")
        .and_then(Value::as_str)
        .ok_or(ChangeError::MissingApi)?
        .to_string();

    let res = match action.as_str() {
        api::PROJECT_CREATE_BY_WEB
        | api::PROJECT_CREATE_BY_ONE_CLICK
        | api::PROJECT_CREATE_BY_WEB_WITH_XCDB => inner.create_project(&req).await?,
        api::PROJECT_UPDATE_BY_WEB => inner.update_project(&req).await?,
        _ => Value::Null,
    };

    let listener = inner
        .listener()
        .ok_or_else(|| AppError::Internal("Runtime change listener is not registered".into()))?;
    let event = RuntimeChangeEvent::from_action(req, res.clone())?;
    let handled = listener.notify(event).await?;

    Ok(Json(json!({ "data": handled.unwrap_or(res) })))
}
