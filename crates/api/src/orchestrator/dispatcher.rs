//! Runtime-change dispatch.
//!
//! Every change, whether it came through the listener or a direct
//! [`Orchestrator::dispatch`] call, runs under the dispatch gate, so the
//! effects of one change are complete before the next one starts. Errors
//! stop at [`Orchestrator::dispatch`]: they are logged and reported and the
//! process keeps serving under its previous state.

use std::sync::{Arc, Weak};

use serde_json::{json, Value};
use switchyard_core::config::ConfigError;
use switchyard_core::types::ProjectId;
use switchyard_db::MetaError;
use switchyard_events::bus::names;
use switchyard_events::{ChangeStream, PlatformEvent, RuntimeChangeEvent};
use tokio::task::JoinHandle;

use super::Orchestrator;
use crate::auth::controller::AuthError;
use crate::builder::BuilderError;
use crate::config_factory;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("No builder registered for project {0}")]
    BuilderNotFound(ProjectId),

    #[error("Project {0} not found in metadata store")]
    ProjectNotFound(ProjectId),

    #[error(transparent)]
    Meta(#[from] MetaError),

    #[error(transparent)]
    Builder(#[from] BuilderError),

    #[error("Environment switch rejected: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Runtime change received before boot completed")]
    NotBooted,
}

impl Orchestrator {
    /// Handle one change under the dispatch gate. Failures are logged and
    /// reported, and yield `None`.
    pub async fn dispatch(&self, event: &RuntimeChangeEvent) -> Option<Value> {
        let _gate = self.dispatch_gate.lock().await;

        let api = event.api().to_string();
        let project_id = event.project_id().map(str::to_string);
        tracing::debug!(api = %api, project_id = ?project_id, "Dispatching runtime change");

        let mut platform_event =
            PlatformEvent::new(names::RUNTIME_CHANGE).with_payload(json!({ "api": api }));
        if let Some(id) = &project_id {
            platform_event = platform_event.for_project(id.clone());
        }
        self.bus.publish(platform_event);

        match self.handle_runtime_change(event).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(api = %api, project_id = ?project_id, error = %e, "Runtime change failed");
                self.reporter().report("runtime-change", &e);
                let mut failed = PlatformEvent::new(names::RUNTIME_CHANGE_FAILED)
                    .with_payload(json!({ "api": api, "error": e.to_string() }));
                if let Some(id) = project_id {
                    failed = failed.for_project(id);
                }
                self.bus.publish(failed);
                None
            }
        }
    }

    /// Route `event` to the handler for its kind. Only called under the
    /// dispatch gate.
    pub(crate) async fn handle_runtime_change(
        &self,
        event: &RuntimeChangeEvent,
    ) -> Result<Option<Value>, DispatchError> {
        match event {
            RuntimeChangeEvent::ProjectCreated { project_id, .. }
            | RuntimeChangeEvent::ProjectsImported {
                project_id,
                fresh: true,
                ..
            } => self.create_builder(project_id).await,
            RuntimeChangeEvent::ProjectUpdated { project_id, .. } => {
                self.update_builder(project_id).await
            }
            RuntimeChangeEvent::EnvironmentSwitched { env, .. } => {
                self.switch_environment(env.as_deref()).await
            }
            RuntimeChangeEvent::ProjectsImported { project_id, .. } => {
                self.forward(Some(project_id.as_str()), event).await
            }
            RuntimeChangeEvent::Other { project_id, .. } => {
                self.forward(project_id.as_deref(), event).await
            }
        }
    }

    async fn create_builder(&self, project_id: &str) -> Result<Option<Value>, DispatchError> {
        if self.registry.contains(project_id).await {
            tracing::warn!(project_id, "Builder already registered, ignoring duplicate create");
            return Ok(None);
        }

        let project = self
            .meta
            .get_project_by_id(project_id)
            .await?
            .ok_or_else(|| DispatchError::ProjectNotFound(project_id.to_string()))?;
        let builder = self
            .components
            .builder_factory
            .create(project, self.builder_context());
        self.registry.push(Arc::clone(&builder)).await;
        builder.init(true).await?;

        tracing::info!(project_id, "Project builder created");
        Ok(None)
    }

    async fn update_builder(&self, project_id: &str) -> Result<Option<Value>, DispatchError> {
        let builder = self
            .registry
            .find(project_id)
            .await
            .ok_or_else(|| DispatchError::BuilderNotFound(project_id.to_string()))?;
        let project = self
            .meta
            .get_project_by_id(project_id)
            .await?
            .ok_or_else(|| DispatchError::ProjectNotFound(project_id.to_string()))?;

        builder.update_config(project.config);
        builder.reinit().await?;
        tracing::info!(project_id, "Project builder reinitialized");
        Ok(None)
    }

    async fn forward(
        &self,
        project_id: Option<&str>,
        event: &RuntimeChangeEvent,
    ) -> Result<Option<Value>, DispatchError> {
        let Some(project_id) = project_id else {
            tracing::debug!(api = %event.api(), "Runtime change without project, dropped");
            return Ok(None);
        };
        let Some(builder) = self.registry.find(project_id).await else {
            tracing::debug!(api = %event.api(), project_id, "No builder for runtime change, dropped");
            return Ok(None);
        };
        Ok(builder.handle_runtime_change(event).await?)
    }

    /// Reload the configuration and rebuild the frame under it.
    ///
    /// Nothing live is touched until the new configuration has loaded,
    /// validated and been accepted by the metadata store, and the new frame
    /// is swapped in whole. Any failure leaves the previous configuration
    /// and routes in place.
    async fn switch_environment(&self, env: Option<&str>) -> Result<Option<Value>, DispatchError> {
        let table = self.route_table().ok_or(DispatchError::NotBooted)?;
        let previous = self.config();

        let mut next = config_factory::reload(&self.server.config_path, &self.server)?;
        if let Some(env) = env {
            next.working_env = env.to_string();
            next.validate()?;
        }
        if next.jwt_declared() && next.jwt_secret().is_none() {
            if let Some(Some(secret)) = self.secret.get() {
                next.set_jwt_secret(secret.clone());
            }
        }
        let next = Arc::new(next);

        self.meta.set_active_config(Arc::clone(&next)).await?;
        if let Err(e) = self
            .components
            .auth
            .init(Arc::clone(&self.meta), Arc::clone(&next))
            .await
        {
            if let Err(restore) = self.meta.set_active_config(Arc::clone(&previous)).await {
                tracing::error!(error = %restore, "Failed to restore metadata store config");
            }
            return Err(e.into());
        }
        self.meta_manager.set_config(Arc::clone(&next));
        self.active.replace(Arc::clone(&next));

        table.replace(self.frame(&next));

        self.bus.publish(
            PlatformEvent::new(names::ENV_SWITCHED)
                .with_payload(json!({ "from": previous.working_env, "to": next.working_env })),
        );
        tracing::info!(from = %previous.working_env, to = %next.working_env, "Environment switched");
        Ok(Some(json!({ "workingEnv": next.working_env })))
    }

    /// Drain `stream` one change at a time until shutdown.
    pub(super) fn spawn_dispatcher(self: &Arc<Self>, mut stream: ChangeStream) -> JoinHandle<()> {
        let orchestrator: Weak<Self> = Arc::downgrade(self);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                let envelope = tokio::select! {
                    () = cancel.cancelled() => break,
                    next = stream.next() => match next {
                        Some(envelope) => envelope,
                        None => break,
                    },
                };
                let Some(orchestrator) = orchestrator.upgrade() else {
                    envelope.respond(None);
                    break;
                };
                let result = orchestrator.dispatch(&envelope.event).await;
                envelope.respond(result);
            }
            stream.close();
            tracing::debug!("Runtime change dispatcher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use assert_matches::assert_matches;
    use switchyard_core::project::{Project, ProjectStatus};
    use switchyard_db::{InMemoryMetaStore, SqlxMigrationEngine};

    use super::*;
    use crate::config::ServerConfig;
    use crate::orchestrator::{InitOptions, OrchestratorParts};
    use crate::upgrader::VersionedUpgrader;
    use crate::variant::{Components, Variant};

    fn orchestrator(dir: &Path, meta: Arc<InMemoryMetaStore>) -> Arc<Orchestrator> {
        let server = ServerConfig {
            host: "127.0.0.1".into(),
            port: 8080,
            request_body_size: 64 * 1024,
            sentry_dsn: None,
            ee: false,
            tool_dir: dir.to_path_buf(),
            config_path: dir.join("config.xc.json"),
            database_url: Some("postgres://localhost/meta".into()),
            trial: true,
            status_port: None,
            public_url: None,
        };
        let config = config_factory::make(&server).unwrap();
        Orchestrator::new(
            server,
            config,
            OrchestratorParts {
                meta,
                migrations: Arc::new(SqlxMigrationEngine::new()),
                upgrader: Arc::new(VersionedUpgrader::new()),
                components: Components::for_variant(Variant::Community),
            },
        )
    }

    fn event(req: Value, res: Value) -> RuntimeChangeEvent {
        RuntimeChangeEvent::from_action(req, res).unwrap()
    }

    #[tokio::test]
    async fn env_switch_before_boot_is_not_booted() {
        let dir = tempfile::tempdir().unwrap();
        let o = orchestrator(dir.path(), Arc::new(InMemoryMetaStore::new()));

        let switch = event(json!({"api": "projectChangeEnv", "args": {"env": "x"}}), Value::Null);
        assert_matches!(
            o.handle_runtime_change(&switch).await,
            Err(DispatchError::NotBooted)
        );
    }

    #[tokio::test]
    async fn missing_builder_and_project_are_distinct_errors() {
        let dir = tempfile::tempdir().unwrap();
        let meta = Arc::new(InMemoryMetaStore::new());
        let o = orchestrator(dir.path(), meta.clone());
        o.init(InitOptions::default()).await.unwrap();
        meta.seed_project(&Project::new("P7", "", ProjectStatus::Started))
            .await
            .unwrap();

        let update = event(json!({"api": "projectUpdateByWeb", "project_id": "P7"}), Value::Null);
        assert_matches!(
            o.handle_runtime_change(&update).await,
            Err(DispatchError::BuilderNotFound(id)) if id == "P7"
        );

        let create = event(json!({"api": "projectCreateByWeb"}), json!({"id": "ghost"}));
        assert_matches!(
            o.handle_runtime_change(&create).await,
            Err(DispatchError::ProjectNotFound(id)) if id == "ghost"
        );
    }

    #[tokio::test]
    async fn unreadable_config_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let o = orchestrator(dir.path(), Arc::new(InMemoryMetaStore::new()));
        o.init(InitOptions::default()).await.unwrap();
        std::fs::write(dir.path().join("config.xc.json"), "{ not json").unwrap();

        let switch = event(json!({"api": "projectChangeEnv", "args": {"env": "x"}}), Value::Null);
        assert_matches!(
            o.handle_runtime_change(&switch).await,
            Err(DispatchError::Config(ConfigError::Parse { .. }))
        );
    }
}
