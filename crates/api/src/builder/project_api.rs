//! The concrete project builder.
//!
//! Each builder mounts a small management surface for its project under
//! `/nc/{project_id}/api/v1/` (`_info`, `_health`, and `_audit` in the
//! enterprise variant) and reacts to start/stop/restart and non-fresh
//! import changes. Route synthesis from a tenant's schema is not done
//! here.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use switchyard_core::project::{Project, ProjectStatus};
use switchyard_core::types::ProjectId;
use switchyard_db::meta::record;
use switchyard_db::{MetaScope, MetaTable};
use switchyard_events::bus::names;
use switchyard_events::change::api;
use switchyard_events::{PlatformEvent, RuntimeChangeEvent};
use tokio::sync::Mutex;

use super::{BuilderContext, BuilderError, BuilderFactory, ProjectBuilder};
use crate::variant::Variant;

/// Audit entries kept per builder; older ones are dropped.
pub const AUDIT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub api: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
struct BuilderState {
    title: String,
    status: ProjectStatus,
    config: Value,
    /// Incremented on every (re)mount.
    generation: u64,
    mounted_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    audit: VecDeque<AuditEntry>,
}

struct Inner {
    id: ProjectId,
    variant: Variant,
    ctx: BuilderContext,
    state: RwLock<BuilderState>,
    /// Serializes init/reinit/stop of this builder.
    lifecycle: Mutex<()>,
}

impl Inner {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, BuilderState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BuilderState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct ProjectApiBuilder {
    inner: Arc<Inner>,
}

impl ProjectApiBuilder {
    pub fn new(project: Project, ctx: BuilderContext, variant: Variant) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: project.id,
                variant,
                ctx,
                state: RwLock::new(BuilderState {
                    title: project.title,
                    status: project.status,
                    config: project.config,
                    generation: 0,
                    mounted_at: None,
                    audit: VecDeque::new(),
                }),
                lifecycle: Mutex::new(()),
            }),
        }
    }

    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.ctx.routes.is_mounted(&self.inner.id)
    }

    fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/api/v1/_info", get(info))
            .route("/api/v1/_health", get(health));
        if self.inner.variant == Variant::Enterprise {
            router = router.route("/api/v1/_audit", get(audit));
        }
        router.with_state(Arc::clone(&self.inner))
    }

    fn mount(&self, fresh: bool) {
        let generation = {
            let mut state = self.inner.write();
            state.generation += 1;
            state.mounted_at = Some(Utc::now());
            state.generation
        };
        self.inner.ctx.routes.mount(&self.inner.id, self.router());
        self.inner.ctx.bus.publish(
            PlatformEvent::new(names::PROJECT_MOUNTED)
                .for_project(self.inner.id.clone())
                .with_payload(json!({ "fresh": fresh, "generation": generation })),
        );
        tracing::info!(project_id = %self.inner.id, generation, fresh, "Project routes mounted");
    }

    fn unmount(&self) -> bool {
        let removed = self.inner.ctx.routes.unmount(&self.inner.id);
        if removed {
            self.inner.write().mounted_at = None;
            self.inner
                .ctx
                .bus
                .publish(PlatformEvent::new(names::PROJECT_UNMOUNTED).for_project(self.inner.id.clone()));
            tracing::info!(project_id = %self.inner.id, "Project routes unmounted");
        }
        removed
    }

    async fn persist_status(&self, status: ProjectStatus) -> Result<(), BuilderError> {
        self.inner
            .ctx
            .meta
            .update_record(
                &MetaScope::global(),
                MetaTable::Projects,
                record([("status", json!(status.as_str()))]),
                &record([("id", json!(self.inner.id))]),
            )
            .await?;
        self.inner.write().status = status;
        Ok(())
    }

    async fn start(&self) -> Result<Value, BuilderError> {
        if !self.is_mounted() {
            self.init(false).await?;
        }
        self.persist_status(ProjectStatus::Started).await?;
        Ok(json!({ "status": ProjectStatus::Started }))
    }

    async fn stop(&self) -> Result<Value, BuilderError> {
        {
            let _guard = self.inner.lifecycle.lock().await;
            self.unmount();
        }
        self.persist_status(ProjectStatus::Stopped).await?;
        Ok(json!({ "status": ProjectStatus::Stopped }))
    }

    async fn restart(&self) -> Result<Value, BuilderError> {
        if self.is_mounted() {
            self.reinit().await?;
        } else {
            self.init(false).await?;
        }
        self.persist_status(ProjectStatus::Started).await?;
        Ok(json!({ "status": ProjectStatus::Started }))
    }
}

#[async_trait]
impl ProjectBuilder for ProjectApiBuilder {
    fn id(&self) -> &str {
        &self.inner.id
    }

    async fn init(&self, fresh: bool) -> Result<(), BuilderError> {
        let _guard = self.inner.lifecycle.lock().await;

        if !fresh {
            let project = self
                .inner
                .ctx
                .meta
                .get_project_by_id(&self.inner.id)
                .await?
                .ok_or_else(|| BuilderError::ProjectMissing(self.inner.id.clone()))?;
            let mut state = self.inner.write();
            state.title = project.title;
            state.status = project.status;
            state.config = project.config;
        }

        self.mount(fresh);
        Ok(())
    }

    async fn reinit(&self) -> Result<(), BuilderError> {
        let _guard = self.inner.lifecycle.lock().await;
        if !self.is_mounted() {
            tracing::debug!(project_id = %self.inner.id, "Reinit skipped, project not mounted");
            return Ok(());
        }
        self.mount(false);
        Ok(())
    }

    fn update_config(&self, config: Value) {
        self.inner.write().config = config;
        tracing::debug!(project_id = %self.inner.id, "Project config updated");
    }

    async fn handle_runtime_change(
        &self,
        event: &RuntimeChangeEvent,
    ) -> Result<Option<Value>, BuilderError> {
        if self.inner.variant == Variant::Enterprise {
            let mut state = self.inner.write();
            if state.audit.len() == AUDIT_CAPACITY {
                state.audit.pop_front();
            }
            state.audit.push_back(AuditEntry {
                api: event.api().to_string(),
                at: Utc::now(),
            });
        }

        let result = match event {
            RuntimeChangeEvent::ProjectsImported { fresh: false, .. } => {
                if self.is_mounted() {
                    self.reinit().await?;
                } else {
                    self.init(false).await?;
                }
                Some(json!({ "reloaded": true }))
            }
            RuntimeChangeEvent::Other { api, .. } => match api.as_str() {
                api::PROJECT_START => Some(self.start().await?),
                api::PROJECT_STOP => Some(self.stop().await?),
                api::PROJECT_RESTART => Some(self.restart().await?),
                _ => None,
            },
            _ => None,
        };
        Ok(result)
    }
}

async fn info(State(inner): State<Arc<Inner>>) -> Json<Value> {
    let state = inner.read().clone();
    Json(json!({
        "id": inner.id,
        "title": state.title,
        "status": state.status,
        "config": state.config,
        "generation": state.generation,
        "mounted_at": state.mounted_at,
        "variant": inner.variant,
    }))
}

async fn health(State(inner): State<Arc<Inner>>) -> Json<Value> {
    Json(json!({ "status": "ok", "project_id": inner.id }))
}

async fn audit(State(inner): State<Arc<Inner>>) -> Json<Value> {
    let entries = inner.read().audit.clone();
    Json(json!({ "data": entries }))
}

/// Creates a [`ProjectApiBuilder`] per project for one [`Variant`].
#[derive(Debug, Clone, Copy)]
pub struct ProjectApiBuilderFactory {
    variant: Variant,
}

impl ProjectApiBuilderFactory {
    pub fn new(variant: Variant) -> Self {
        Self { variant }
    }
}

impl BuilderFactory for ProjectApiBuilderFactory {
    fn create(&self, project: Project, ctx: BuilderContext) -> Arc<dyn ProjectBuilder> {
        Arc::new(ProjectApiBuilder::new(project, ctx, self.variant))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use switchyard_db::{InMemoryMetaStore, MetaStore};
    use switchyard_events::EventBus;

    use super::*;
    use crate::route_table::ProjectRoutes;

    async fn context(projects: &[Project]) -> (BuilderContext, Arc<InMemoryMetaStore>) {
        let meta = Arc::new(InMemoryMetaStore::new());
        for project in projects {
            meta.seed_project(project).await.unwrap();
        }
        let ctx = BuilderContext {
            routes: ProjectRoutes::new(),
            meta: meta.clone(),
            bus: Arc::new(EventBus::default()),
        };
        (ctx, meta)
    }

    fn other(api: &str) -> RuntimeChangeEvent {
        RuntimeChangeEvent::from_action(json!({"api": api, "project_id": "p_1"}), Value::Null).unwrap()
    }

    #[tokio::test]
    async fn init_mounts_and_reinit_bumps_generation() {
        let project = Project::new("p_1", "CRM", ProjectStatus::Started);
        let (ctx, _) = context(&[project.clone()]).await;
        let builder = ProjectApiBuilder::new(project, ctx.clone(), Variant::Community);

        builder.init(false).await.unwrap();
        assert!(ctx.routes.is_mounted("p_1"));
        assert_eq!(builder.generation(), 1);

        builder.reinit().await.unwrap();
        assert_eq!(builder.generation(), 2);
    }

    #[tokio::test]
    async fn non_fresh_init_requires_persisted_project() {
        let (ctx, _) = context(&[]).await;
        let builder = ProjectApiBuilder::new(
            Project::new("p_gone", "", ProjectStatus::Started),
            ctx.clone(),
            Variant::Community,
        );

        assert_matches!(builder.init(false).await, Err(BuilderError::ProjectMissing(id)) if id == "p_gone");
        assert!(!ctx.routes.is_mounted("p_gone"));

        builder.init(true).await.unwrap();
        assert!(ctx.routes.is_mounted("p_gone"));
    }

    #[tokio::test]
    async fn reinit_of_unmounted_project_stays_unmounted() {
        let project = Project::new("p_1", "", ProjectStatus::Stopped);
        let (ctx, _) = context(&[project.clone()]).await;
        let builder = ProjectApiBuilder::new(project, ctx.clone(), Variant::Community);

        builder.reinit().await.unwrap();
        assert!(!ctx.routes.is_mounted("p_1"));
        assert_eq!(builder.generation(), 0);
    }

    #[tokio::test]
    async fn start_and_stop_persist_status() {
        let project = Project::new("p_1", "", ProjectStatus::Stopped);
        let (ctx, meta) = context(&[project.clone()]).await;
        let builder = ProjectApiBuilder::new(project, ctx.clone(), Variant::Community);

        let result = builder.handle_runtime_change(&other(api::PROJECT_START)).await.unwrap();
        assert_eq!(result, Some(json!({"status": "started"})));
        assert!(ctx.routes.is_mounted("p_1"));
        let stored = meta.get_project_by_id("p_1").await.unwrap().unwrap();
        assert_eq!(stored.status, ProjectStatus::Started);

        builder.handle_runtime_change(&other(api::PROJECT_STOP)).await.unwrap();
        assert!(!ctx.routes.is_mounted("p_1"));
        let stored = meta.get_project_by_id("p_1").await.unwrap().unwrap();
        assert_eq!(stored.status, ProjectStatus::Stopped);
    }

    #[tokio::test]
    async fn unknown_changes_return_none() {
        let project = Project::new("p_1", "", ProjectStatus::Started);
        let (ctx, _) = context(&[project.clone()]).await;
        let builder = ProjectApiBuilder::new(project, ctx, Variant::Community);
        assert_eq!(builder.handle_runtime_change(&other("tableCreate")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn non_fresh_import_reloads() {
        let project = Project::new("p_1", "", ProjectStatus::Started);
        let (ctx, _) = context(&[project.clone()]).await;
        let builder = ProjectApiBuilder::new(project, ctx, Variant::Enterprise);
        builder.init(false).await.unwrap();

        let event = RuntimeChangeEvent::from_action(
            json!({"api": api::IMPORT_ZIP_TO_LOCAL_FS_AND_DB, "project_id": "p_1"}),
            Value::Null,
        )
        .unwrap();
        let result = builder.handle_runtime_change(&event).await.unwrap();
        assert_eq!(result, Some(json!({"reloaded": true})));
        assert_eq!(builder.generation(), 2);
        assert_eq!(builder.inner.read().audit.len(), 1);
    }

    #[tokio::test]
    async fn audit_keeps_only_the_latest_entries() {
        let project = Project::new("p_1", "", ProjectStatus::Started);
        let (ctx, _) = context(&[project.clone()]).await;
        let builder = ProjectApiBuilder::new(project, ctx, Variant::Enterprise);

        for i in 0..AUDIT_CAPACITY + 44 {
            builder.handle_runtime_change(&other(&format!("op{i}"))).await.unwrap();
        }

        let state = builder.inner.read();
        assert_eq!(state.audit.len(), AUDIT_CAPACITY);
        assert_eq!(state.audit.front().unwrap().api, "op44");
        assert_eq!(
            state.audit.back().unwrap().api,
            format!("op{}", AUDIT_CAPACITY + 43)
        );
    }
}
