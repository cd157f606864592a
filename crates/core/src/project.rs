//! Tenant project model.
//!
//! A [`Project`] is read from the metadata store, handed to a project
//! builder and never deleted by the orchestrator itself. Only projects whose
//! persisted [`ProjectStatus`] is `started` or `starting` are initialized at
//! boot.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{ProjectId, Timestamp};

/// Persisted lifecycle status of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Created,
    Starting,
    Started,
    Stopping,
    Stopped,
    Errored,
}

impl ProjectStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [ProjectStatus; 6] = [
        ProjectStatus::Created,
        ProjectStatus::Starting,
        ProjectStatus::Started,
        ProjectStatus::Stopping,
        ProjectStatus::Stopped,
        ProjectStatus::Errored,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Created => "created",
            ProjectStatus::Starting => "starting",
            ProjectStatus::Started => "started",
            ProjectStatus::Stopping => "stopping",
            ProjectStatus::Stopped => "stopped",
            ProjectStatus::Errored => "errored",
        }
    }

    /// Whether a project in this status is initialized when the process boots.
    pub fn is_auto_start(self) -> bool {
        matches!(self, ProjectStatus::Started | ProjectStatus::Starting)
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProjectStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown project status '{s}'")))
    }
}

/// A project record from the `nc_projects` metadata table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    #[serde(default)]
    pub title: String,
    pub status: ProjectStatus,
    /// Project-scoped configuration, opaque to the orchestrator.
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

impl Project {
    /// Build a project record that has not been persisted yet.
    pub fn new(id: impl Into<ProjectId>, title: impl Into<String>, status: ProjectStatus) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status,
            config: serde_json::Value::Object(Default::default()),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}
