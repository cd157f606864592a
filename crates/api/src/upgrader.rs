//! One-time metadata upgrades run after schema migration.
//!
//! Steps are keyed by zero-padded version strings and run in order. The
//! last applied version is kept in `nc_store` under [`CONFIG_KEY`]; on a
//! fresh install the latest version is recorded without running anything.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use switchyard_core::project::ProjectStatus;
use switchyard_db::meta::record;
use switchyard_db::{MetaError, MetaScope, MetaStore, MetaTable};

pub const CONFIG_KEY: &str = "NC_CONFIG_MAIN";

#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    #[error("Failed to read or record upgrade version: {0}")]
    Meta(#[from] MetaError),

    #[error("Upgrade step {version} failed: {source}")]
    Step {
        version: &'static str,
        #[source]
        source: MetaError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeReport {
    /// Version recorded before this run; `None` on a fresh install.
    pub from: Option<String>,
    pub to: String,
    pub applied: Vec<&'static str>,
}

#[async_trait]
pub trait Upgrader: Send + Sync {
    async fn upgrade(&self, meta: &dyn MetaStore) -> Result<UpgradeReport, UpgradeError>;
}

type StepFn = for<'a> fn(&'a dyn MetaStore) -> BoxFuture<'a, Result<(), MetaError>>;

pub struct UpgradeStep {
    pub version: &'static str,
    run: StepFn,
}

/// Projects saved without a config get an empty object.
fn empty_project_config(meta: &dyn MetaStore) -> BoxFuture<'_, Result<(), MetaError>> {
    Box::pin(async move {
        for project in meta.list_projects().await? {
            if project.config.is_null() {
                meta.update_record(
                    &MetaScope::global(),
                    MetaTable::Projects,
                    record([("config", json!({}))]),
                    &record([("id", json!(project.id))]),
                )
                .await?;
            }
        }
        Ok(())
    })
}

/// Projects left in `stopping` by an interrupted stop are `stopped`.
fn settle_stopping_projects(meta: &dyn MetaStore) -> BoxFuture<'_, Result<(), MetaError>> {
    Box::pin(async move {
        let settled = meta
            .update_record(
                &MetaScope::global(),
                MetaTable::Projects,
                record([("status", json!(ProjectStatus::Stopped.as_str()))]),
                &record([("status", json!(ProjectStatus::Stopping.as_str()))]),
            )
            .await?;
        if settled > 0 {
            tracing::info!(settled, "Settled projects stuck in stopping");
        }
        Ok(())
    })
}

/// [`Upgrader`] over an ordered list of versioned steps.
pub struct VersionedUpgrader {
    steps: Vec<UpgradeStep>,
}

impl Default for VersionedUpgrader {
    fn default() -> Self {
        Self {
            steps: vec![
                UpgradeStep {
                    version: "0009000",
                    run: empty_project_config,
                },
                UpgradeStep {
                    version: "0011043",
                    run: settle_stopping_projects,
                },
            ],
        }
    }
}

impl VersionedUpgrader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> &'static str {
        self.steps.last().map_or("0000000", |s| s.version)
    }

    async fn stored_version(meta: &dyn MetaStore) -> Result<Option<String>, MetaError> {
        let found = meta
            .get_record(
                &MetaScope::global(),
                MetaTable::Store,
                &record([("key", json!(CONFIG_KEY))]),
            )
            .await?;
        Ok(found.and_then(|r| r.get("value").and_then(Value::as_str).map(str::to_string)))
    }
}

#[async_trait]
impl Upgrader for VersionedUpgrader {
    async fn upgrade(&self, meta: &dyn MetaStore) -> Result<UpgradeReport, UpgradeError> {
        let latest = self.latest();
        let filter = record([("key", json!(CONFIG_KEY))]);

        let Some(from) = Self::stored_version(meta).await? else {
            meta.insert_record(
                &MetaScope::global(),
                MetaTable::Store,
                record([("key", json!(CONFIG_KEY)), ("value", json!(latest))]),
            )
            .await?;
            tracing::info!(version = latest, "Recorded metadata version for fresh install");
            return Ok(UpgradeReport {
                from: None,
                to: latest.to_string(),
                applied: Vec::new(),
            });
        };

        let mut applied = Vec::new();
        for step in self.steps.iter().filter(|s| s.version > from.as_str()) {
            tracing::info!(version = step.version, "Running metadata upgrade");
            (step.run)(meta)
                .await
                .map_err(|source| UpgradeError::Step {
                    version: step.version,
                    source,
                })?;
            meta.update_record(
                &MetaScope::global(),
                MetaTable::Store,
                record([("value", json!(step.version))]),
                &filter,
            )
            .await?;
            applied.push(step.version);
        }

        Ok(UpgradeReport {
            to: applied.last().map_or_else(|| from.clone(), |v| v.to_string()),
            from: Some(from),
            applied,
        })
    }
}
