//! Per-project builders.
//!
//! A [`ProjectBuilder`] owns the route set of one project. The orchestrator
//! creates builders through a [`BuilderFactory`] (synchronously, in
//! registry order) and drives them through `init`, `reinit`,
//! `update_config` and `handle_runtime_change`.

use std::sync::Arc;

use async_trait::async_trait;
use switchyard_core::project::Project;
use switchyard_core::types::ProjectId;
use switchyard_db::{MetaError, MetaStore};
use switchyard_events::{EventBus, RuntimeChangeEvent};

use crate::route_table::ProjectRoutes;

pub mod project_api;

pub use project_api::{ProjectApiBuilder, ProjectApiBuilderFactory};

#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error("Project {0} no longer exists")]
    ProjectMissing(ProjectId),

    #[error("Project {0} is not initialized")]
    NotInitialized(ProjectId),

    #[error(transparent)]
    Meta(#[from] MetaError),
}

/// Shared handles every builder is constructed with.
#[derive(Clone)]
pub struct BuilderContext {
    pub routes: Arc<ProjectRoutes>,
    pub meta: Arc<dyn MetaStore>,
    pub bus: Arc<EventBus>,
}

#[async_trait]
pub trait ProjectBuilder: Send + Sync {
    fn id(&self) -> &str;

    /// Mount the project's routes. `fresh` skips checks that assume the
    /// project already existed before this process saw it.
    async fn init(&self, fresh: bool) -> Result<(), BuilderError>;

    /// Rebuild and remount routes from the current configuration.
    async fn reinit(&self) -> Result<(), BuilderError>;

    /// Replace the project-scoped configuration used by the next (re)init.
    fn update_config(&self, config: serde_json::Value);

    /// Handle a runtime change addressed to this project.
    async fn handle_runtime_change(
        &self,
        event: &RuntimeChangeEvent,
    ) -> Result<Option<serde_json::Value>, BuilderError>;
}

/// Construction-time choice of builder implementation.
pub trait BuilderFactory: Send + Sync {
    fn create(&self, project: Project, ctx: BuilderContext) -> Arc<dyn ProjectBuilder>;
}
