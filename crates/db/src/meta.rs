//! The metadata store capability interface.
//!
//! Records are JSON objects ([`Record`]) addressed by a [`MetaScope`]
//! (project id + db alias, both empty for platform-wide records), a closed
//! set of tables ([`MetaTable`]) and an equality filter. Keys used in
//! filters and patches are checked against the table's column list before
//! any query is built.

use std::sync::Arc;

use async_trait::async_trait;
use switchyard_core::config::PlatformConfig;
use switchyard_core::error::CoreError;
use switchyard_core::project::Project;

/// A metadata row as a JSON object.
pub type Record = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Metadata schema migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Unknown column '{column}' for table {table}")]
    UnknownColumn { table: &'static str, column: String },

    #[error("Duplicate record in {table}: {detail}")]
    Conflict { table: &'static str, detail: String },

    #[error("Failed to decode {table} record: {source}")]
    Decode {
        table: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration rejected by metadata store: {0}")]
    Rejected(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Metadata tables known to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaTable {
    /// `nc_store` -- key/value settings (secrets, versions).
    Store,
    /// `nc_projects` -- tenant projects.
    Projects,
}

const STORE_COLUMNS: &[&str] = &[
    "id",
    "project_id",
    "db_alias",
    "key",
    "value",
    "created_at",
    "updated_at",
];

const PROJECT_COLUMNS: &[&str] = &["id", "title", "status", "config", "created_at", "updated_at"];

impl MetaTable {
    pub fn as_str(self) -> &'static str {
        match self {
            MetaTable::Store => "nc_store",
            MetaTable::Projects => "nc_projects",
        }
    }

    pub fn columns(self) -> &'static [&'static str] {
        match self {
            MetaTable::Store => STORE_COLUMNS,
            MetaTable::Projects => PROJECT_COLUMNS,
        }
    }

    /// Whether rows carry `project_id` / `db_alias` scope columns.
    pub fn is_scoped(self) -> bool {
        matches!(self, MetaTable::Store)
    }

    /// Column that must be unique within a scope.
    pub fn unique_key(self) -> &'static str {
        match self {
            MetaTable::Store => "key",
            MetaTable::Projects => "id",
        }
    }

    /// Reject any key that is not a column of this table.
    pub fn check_columns<'a>(
        self,
        keys: impl IntoIterator<Item = &'a String>,
    ) -> Result<(), MetaError> {
        for key in keys {
            if !self.columns().contains(&key.as_str()) {
                return Err(MetaError::UnknownColumn {
                    table: self.as_str(),
                    column: key.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Scope of a metadata record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MetaScope {
    pub project_id: String,
    pub db_alias: String,
}

impl MetaScope {
    /// Platform-wide scope (empty project id and alias).
    pub fn global() -> Self {
        Self::default()
    }

    pub fn project(project_id: impl Into<String>, db_alias: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            db_alias: db_alias.into(),
        }
    }
}

/// Build a [`Record`] from `(column, value)` pairs.
pub fn record<const N: usize>(pairs: [(&str, serde_json::Value); N]) -> Record {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Decode a project from its metadata record.
pub fn project_from_record(record: Record) -> Result<Project, MetaError> {
    serde_json::from_value(serde_json::Value::Object(record)).map_err(|source| MetaError::Decode {
        table: MetaTable::Projects.as_str(),
        source,
    })
}

/// Encode a project as a metadata record (timestamps are left to the store).
pub fn project_to_record(project: &Project) -> Record {
    record([
        ("id", serde_json::Value::String(project.id.clone())),
        ("title", serde_json::Value::String(project.title.clone())),
        (
            "status",
            serde_json::Value::String(project.status.as_str().to_string()),
        ),
        ("config", project.config.clone()),
    ])
}

/// Durable store for platform configuration, projects and secrets.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Prepare the store for queries (schema, connections).
    async fn init(&self) -> Result<(), MetaError>;

    /// First record of `table` in `scope` matching every `filter` entry.
    async fn get_record(
        &self,
        scope: &MetaScope,
        table: MetaTable,
        filter: &Record,
    ) -> Result<Option<Record>, MetaError>;

    async fn insert_record(
        &self,
        scope: &MetaScope,
        table: MetaTable,
        record: Record,
    ) -> Result<(), MetaError>;

    /// Apply `patch` to every matching record; returns the number updated.
    async fn update_record(
        &self,
        scope: &MetaScope,
        table: MetaTable,
        patch: Record,
        filter: &Record,
    ) -> Result<u64, MetaError>;

    /// All projects in listing order (oldest first).
    async fn list_projects(&self) -> Result<Vec<Project>, MetaError>;

    async fn get_project_by_id(&self, id: &str) -> Result<Option<Project>, MetaError>;

    /// Repoint the store at a new configuration. On error the previous
    /// configuration stays in effect.
    async fn set_active_config(&self, config: Arc<PlatformConfig>) -> Result<(), MetaError>;
}
