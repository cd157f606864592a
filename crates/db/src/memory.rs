//! In-memory [`MetaStore`] used in trial deployments and tests.
//!
//! Rows are kept in insertion order, which is also the project listing
//! order. Column checks and per-scope uniqueness match the Postgres store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use switchyard_core::config::PlatformConfig;
use switchyard_core::project::Project;
use tokio::sync::RwLock;

use crate::meta::{
    project_from_record, project_to_record, record, MetaError, MetaScope, MetaStore, MetaTable,
    Record,
};

struct StoredRow {
    table: MetaTable,
    scope: MetaScope,
    record: Record,
}

impl StoredRow {
    fn matches(&self, table: MetaTable, scope: &MetaScope, filter: &Record) -> bool {
        self.table == table
            && (!table.is_scoped() || &self.scope == scope)
            && filter
                .iter()
                .all(|(k, v)| self.record.get(k).unwrap_or(&serde_json::Value::Null) == v)
    }
}

#[derive(Default)]
pub struct InMemoryMetaStore {
    rows: RwLock<Vec<StoredRow>>,
    config: RwLock<Option<Arc<PlatformConfig>>>,
}

impl InMemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a project row (used by trial bootstrap and tests).
    pub async fn seed_project(&self, project: &Project) -> Result<(), MetaError> {
        self.insert_record(
            &MetaScope::global(),
            MetaTable::Projects,
            project_to_record(project),
        )
        .await
    }

    /// The configuration most recently accepted by [`MetaStore::set_active_config`].
    pub async fn active_config(&self) -> Option<Arc<PlatformConfig>> {
        self.config.read().await.clone()
    }
}

fn now_value() -> serde_json::Value {
    serde_json::Value::String(Utc::now().to_rfc3339())
}

#[async_trait]
impl MetaStore for InMemoryMetaStore {
    async fn init(&self) -> Result<(), MetaError> {
        tracing::debug!("In-memory metadata store ready");
        Ok(())
    }

    async fn get_record(
        &self,
        scope: &MetaScope,
        table: MetaTable,
        filter: &Record,
    ) -> Result<Option<Record>, MetaError> {
        table.check_columns(filter.keys())?;
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .find(|row| row.matches(table, scope, filter))
            .map(|row| row.record.clone()))
    }

    async fn insert_record(
        &self,
        scope: &MetaScope,
        table: MetaTable,
        mut record: Record,
    ) -> Result<(), MetaError> {
        table.check_columns(record.keys())?;

        let unique = table.unique_key();
        let mut rows = self.rows.write().await;
        if let Some(value) = record.get(unique) {
            let probe = self::record([(unique, value.clone())]);
            if rows.iter().any(|row| row.matches(table, scope, &probe)) {
                return Err(MetaError::Conflict {
                    table: table.as_str(),
                    detail: format!("{unique} = {value}"),
                });
            }
        }

        if table.is_scoped() {
            record.insert("project_id".into(), scope.project_id.clone().into());
            record.insert("db_alias".into(), scope.db_alias.clone().into());
            record
                .entry("id")
                .or_insert_with(|| serde_json::Value::from(rows.len() as i64 + 1));
        }
        record.entry("created_at").or_insert_with(now_value);
        record.entry("updated_at").or_insert_with(now_value);

        rows.push(StoredRow {
            table,
            scope: scope.clone(),
            record,
        });
        Ok(())
    }

    async fn update_record(
        &self,
        scope: &MetaScope,
        table: MetaTable,
        patch: Record,
        filter: &Record,
    ) -> Result<u64, MetaError> {
        table.check_columns(patch.keys().chain(filter.keys()))?;

        let mut rows = self.rows.write().await;
        let mut updated = 0;
        for row in rows.iter_mut().filter(|row| row.matches(table, scope, filter)) {
            for (k, v) in &patch {
                row.record.insert(k.clone(), v.clone());
            }
            row.record.insert("updated_at".into(), now_value());
            updated += 1;
        }
        Ok(updated)
    }

    async fn list_projects(&self) -> Result<Vec<Project>, MetaError> {
        let rows = self.rows.read().await;
        rows.iter()
            .filter(|row| row.table == MetaTable::Projects)
            .map(|row| project_from_record(row.record.clone()))
            .collect()
    }

    async fn get_project_by_id(&self, id: &str) -> Result<Option<Project>, MetaError> {
        let filter = record([("id", serde_json::Value::String(id.to_string()))]);
        self.get_record(&MetaScope::global(), MetaTable::Projects, &filter)
            .await?
            .map(project_from_record)
            .transpose()
    }

    async fn set_active_config(&self, config: Arc<PlatformConfig>) -> Result<(), MetaError> {
        *self.config.write().await = Some(config);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;
    use switchyard_core::project::ProjectStatus;

    use super::*;

    #[tokio::test]
    async fn store_records_are_isolated_by_scope() {
        let store = InMemoryMetaStore::new();
        let global = MetaScope::global();
        let scoped = MetaScope::project("p_1", "db");

        store
            .insert_record(&global, MetaTable::Store, record([("key", json!("k")), ("value", json!("global"))]))
            .await
            .unwrap();
        store
            .insert_record(&scoped, MetaTable::Store, record([("key", json!("k")), ("value", json!("scoped"))]))
            .await
            .unwrap();

        let filter = record([("key", json!("k"))]);
        let found = store.get_record(&scoped, MetaTable::Store, &filter).await.unwrap().unwrap();
        assert_eq!(found["value"], "scoped");
        assert_eq!(found["project_id"], "p_1");

        let found = store.get_record(&global, MetaTable::Store, &filter).await.unwrap().unwrap();
        assert_eq!(found["value"], "global");
    }

    #[tokio::test]
    async fn duplicate_key_in_same_scope_conflicts() {
        let store = InMemoryMetaStore::new();
        let scope = MetaScope::global();
        let row = record([("key", json!("nc_auth_jwt_secret")), ("value", json!("a"))]);

        store.insert_record(&scope, MetaTable::Store, row.clone()).await.unwrap();
        assert_matches!(
            store.insert_record(&scope, MetaTable::Store, row).await,
            Err(MetaError::Conflict { table: "nc_store", .. })
        );
    }

    #[tokio::test]
    async fn projects_list_in_insertion_order_and_update() {
        let store = InMemoryMetaStore::new();
        for (id, status) in [("p_b", ProjectStatus::Started), ("p_a", ProjectStatus::Stopped)] {
            store.seed_project(&Project::new(id, id, status)).await.unwrap();
        }

        let ids: Vec<_> = store.list_projects().await.unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["p_b", "p_a"]);

        let updated = store
            .update_record(
                &MetaScope::global(),
                MetaTable::Projects,
                record([("status", json!("started"))]),
                &record([("id", json!("p_a"))]),
            )
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let project = store.get_project_by_id("p_a").await.unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Started);
        assert!(store.get_project_by_id("p_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_rejects_unknown_patch_column() {
        let store = InMemoryMetaStore::new();
        let result = store
            .update_record(
                &MetaScope::global(),
                MetaTable::Projects,
                record([("owner", json!("x"))]),
                &Record::new(),
            )
            .await;
        assert_matches!(result, Err(MetaError::UnknownColumn { .. }));
    }

    #[tokio::test]
    async fn accepted_config_is_retained() {
        let store = InMemoryMetaStore::new();
        assert!(store.active_config().await.is_none());
        let config = Arc::new(PlatformConfig::default());
        store.set_active_config(Arc::clone(&config)).await.unwrap();
        assert!(Arc::ptr_eq(&store.active_config().await.unwrap(), &config));
    }
}
