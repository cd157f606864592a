use std::sync::Arc;

use switchyard_core::types::ProjectId;
use tokio::sync::RwLock;

use crate::builder::ProjectBuilder;

/// Live project builders in registration order.
///
/// Only the orchestrator writes here, and only from boot or the dispatcher,
/// so there is never more than one builder per project id.
#[derive(Default)]
pub struct Registry {
    builders: RwLock<Vec<Arc<dyn ProjectBuilder>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every builder; returns how many were registered.
    pub async fn clear(&self) -> usize {
        let mut builders = self.builders.write().await;
        let count = builders.len();
        builders.clear();
        count
    }

    /// Append `builder` unless one with the same id exists. Returns `false`
    /// when the id was already registered.
    pub async fn push(&self, builder: Arc<dyn ProjectBuilder>) -> bool {
        let mut builders = self.builders.write().await;
        if builders.iter().any(|b| b.id() == builder.id()) {
            return false;
        }
        builders.push(builder);
        true
    }

    pub async fn find(&self, project_id: &str) -> Option<Arc<dyn ProjectBuilder>> {
        self.builders
            .read()
            .await
            .iter()
            .find(|b| b.id() == project_id)
            .cloned()
    }

    pub async fn contains(&self, project_id: &str) -> bool {
        self.find(project_id).await.is_some()
    }

    pub async fn ids(&self) -> Vec<ProjectId> {
        self.builders
            .read()
            .await
            .iter()
            .map(|b| b.id().to_string())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.builders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.builders.read().await.is_empty()
    }

    /// Snapshot of every builder, in order.
    pub async fn all(&self) -> Vec<Arc<dyn ProjectBuilder>> {
        self.builders.read().await.clone()
    }
}
