//! Postgres-backed [`MetaStore`].
//!
//! Generic record access goes through `to_jsonb` on reads and
//! `jsonb_populate_record` on writes, so a [`Record`] maps onto table
//! columns without a per-table row type. Table names come from the closed
//! [`MetaTable`] enum and every key is checked against its column list.

use std::sync::Arc;

use async_trait::async_trait;
use switchyard_core::config::PlatformConfig;
use switchyard_core::project::Project;
use tokio::sync::RwLock;

use crate::meta::{project_from_record, record, MetaError, MetaScope, MetaStore, MetaTable, Record};
use crate::{create_lazy_pool, create_pool, health_check, run_meta_migrations, DbPool};

/// Postgres unique-violation SQLSTATE.
const UNIQUE_VIOLATION: &str = "23505";

pub struct PgMetaStore {
    pool: RwLock<DbPool>,
    url: RwLock<String>,
}

/// Metadata database url declared by `config`.
pub fn meta_url(config: &PlatformConfig) -> Result<&str, MetaError> {
    config
        .meta
        .db
        .as_ref()
        .map(|db| db.connection.url.as_str())
        .ok_or_else(|| MetaError::Rejected("no metadata database (meta.db) configured".into()))
}

impl PgMetaStore {
    /// Point at the metadata database declared by `config`. Connections
    /// are opened on first use, so the database may be created afterwards.
    pub fn connect(config: &PlatformConfig) -> Result<Self, MetaError> {
        let url = meta_url(config)?.to_string();
        let pool = create_lazy_pool(&url)?;
        Ok(Self {
            pool: RwLock::new(pool),
            url: RwLock::new(url),
        })
    }

    async fn pool(&self) -> DbPool {
        self.pool.read().await.clone()
    }
}

/// Text form of a filter value, compared against `column::text`.
fn value_as_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build a `WHERE` clause for `scope` + `filter`, numbering binds from
/// `first_bind`. Returns the clause and the values to bind in order.
fn where_clause(
    table: MetaTable,
    scope: &MetaScope,
    filter: &Record,
    first_bind: usize,
) -> Result<(String, Vec<String>), MetaError> {
    table.check_columns(filter.keys())?;

    let mut conditions = Vec::new();
    let mut binds = Vec::new();

    if table.is_scoped() {
        for (column, value) in [("project_id", &scope.project_id), ("db_alias", &scope.db_alias)] {
            conditions.push(format!("t.{column} = ${}", first_bind + binds.len()));
            binds.push(value.clone());
        }
    }

    for (column, value) in filter {
        if value.is_null() {
            conditions.push(format!("t.{column} IS NULL"));
        } else {
            conditions.push(format!("t.{column}::text = ${}", first_bind + binds.len()));
            binds.push(value_as_text(value));
        }
    }

    if conditions.is_empty() {
        return Ok(("TRUE".to_string(), binds));
    }
    Ok((conditions.join(" AND "), binds))
}

fn into_record(table: MetaTable, value: serde_json::Value) -> Result<Record, MetaError> {
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(MetaError::Decode {
            table: table.as_str(),
            source: <serde_json::Error as serde::de::Error>::custom(format!(
                "expected a JSON object, got {other}"
            )),
        }),
    }
}

fn classify_write_error(table: MetaTable, err: sqlx::Error) -> MetaError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return MetaError::Conflict {
                table: table.as_str(),
                detail: db_err.constraint().unwrap_or("unknown").to_string(),
            };
        }
    }
    MetaError::Database(err)
}

#[async_trait]
impl MetaStore for PgMetaStore {
    async fn init(&self) -> Result<(), MetaError> {
        let pool = self.pool().await;
        health_check(&pool).await?;
        run_meta_migrations(&pool).await?;
        tracing::info!("Metadata schema up to date");
        Ok(())
    }

    async fn get_record(
        &self,
        scope: &MetaScope,
        table: MetaTable,
        filter: &Record,
    ) -> Result<Option<Record>, MetaError> {
        let (clause, binds) = where_clause(table, scope, filter, 1)?;
        let sql = format!(
            "SELECT to_jsonb(t) FROM {} t WHERE {clause} ORDER BY t.created_at LIMIT 1",
            table.as_str()
        );

        let mut query = sqlx::query_scalar::<_, serde_json::Value>(&sql);
        for bind in binds {
            query = query.bind(bind);
        }

        let pool = self.pool().await;
        query
            .fetch_optional(&pool)
            .await?
            .map(|value| into_record(table, value))
            .transpose()
    }

    async fn insert_record(
        &self,
        scope: &MetaScope,
        table: MetaTable,
        mut record: Record,
    ) -> Result<(), MetaError> {
        table.check_columns(record.keys())?;
        if table.is_scoped() {
            record.insert("project_id".into(), scope.project_id.clone().into());
            record.insert("db_alias".into(), scope.db_alias.clone().into());
        }

        let columns = record.keys().cloned().collect::<Vec<_>>().join(", ");
        let sql = format!(
            "INSERT INTO {table} ({columns}) \
             SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $1)",
            table = table.as_str(),
        );

        let pool = self.pool().await;
        sqlx::query(&sql)
            .bind(serde_json::Value::Object(record))
            .execute(&pool)
            .await
            .map_err(|e| classify_write_error(table, e))?;
        Ok(())
    }

    async fn update_record(
        &self,
        scope: &MetaScope,
        table: MetaTable,
        patch: Record,
        filter: &Record,
    ) -> Result<u64, MetaError> {
        table.check_columns(patch.keys())?;
        if patch.is_empty() {
            return Ok(0);
        }

        let (clause, binds) = where_clause(table, scope, filter, 2)?;
        let columns: Vec<&String> = patch.keys().collect();
        let targets = columns
            .iter()
            .map(|c| c.as_str())
            .chain(std::iter::once("updated_at"))
            .collect::<Vec<_>>()
            .join(", ");
        let sources = columns
            .iter()
            .map(|c| format!("p.{c}"))
            .chain(std::iter::once("NOW()".to_string()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {table} t SET ({targets}) = \
             (SELECT {sources} FROM jsonb_populate_record(NULL::{table}, $1) p) \
             WHERE {clause}",
            table = table.as_str(),
        );

        let mut query = sqlx::query(&sql).bind(serde_json::Value::Object(patch.clone()));
        for bind in binds {
            query = query.bind(bind);
        }

        let pool = self.pool().await;
        let result = query
            .execute(&pool)
            .await
            .map_err(|e| classify_write_error(table, e))?;
        Ok(result.rows_affected())
    }

    async fn list_projects(&self) -> Result<Vec<Project>, MetaError> {
        let pool = self.pool().await;
        let rows = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT to_jsonb(t) FROM nc_projects t ORDER BY t.created_at ASC, t.id ASC",
        )
        .fetch_all(&pool)
        .await?;

        rows.into_iter()
            .map(|value| into_record(MetaTable::Projects, value).and_then(project_from_record))
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
        let url = meta_url(&config)?.to_string();
        if *self.url.read().await == url {
            return Ok(());
        }

        // Fully prepare the new pool before touching the live one.
        let pool = create_pool(&url).await?;
        health_check(&pool).await?;
        run_meta_migrations(&pool).await?;

        let previous = std::mem::replace(&mut *self.pool.write().await, pool);
        *self.url.write().await = url;
        tokio::spawn(async move { previous.close().await });

        tracing::info!("Metadata store repointed to new configuration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn scoped_where_clause_binds_scope_first() {
        let filter = record([("key", json!("nc_auth_jwt_secret"))]);
        let (clause, binds) =
            where_clause(MetaTable::Store, &MetaScope::project("p_1", "db"), &filter, 2).unwrap();

        assert_eq!(
            clause,
            "t.project_id = $2 AND t.db_alias = $3 AND t.key::text = $4"
        );
        assert_eq!(binds, vec!["p_1", "db", "nc_auth_jwt_secret"]);
    }

    #[test]
    fn null_filter_values_use_is_null() {
        let filter = record([("value", serde_json::Value::Null)]);
        let (clause, binds) =
            where_clause(MetaTable::Store, &MetaScope::global(), &filter, 1).unwrap();
        assert!(clause.ends_with("t.value IS NULL"));
        assert_eq!(binds.len(), 2);
    }

    #[test]
    fn unscoped_empty_filter_matches_everything() {
        let (clause, binds) =
            where_clause(MetaTable::Projects, &MetaScope::global(), &Record::new(), 1).unwrap();
        assert_eq!(clause, "TRUE");
        assert!(binds.is_empty());
    }

    #[test]
    fn where_clause_rejects_unknown_columns() {
        let filter = record([("1=1; DROP TABLE nc_store; --", json!(1))]);
        assert_matches!(
            where_clause(MetaTable::Store, &MetaScope::global(), &filter, 1),
            Err(MetaError::UnknownColumn { .. })
        );
    }

    #[test]
    fn non_string_values_compare_as_json_text() {
        assert_eq!(value_as_text(&json!(42)), "42");
        assert_eq!(value_as_text(&json!(true)), "true");
        assert_eq!(value_as_text(&json!("started")), "started");
    }

    #[test]
    fn missing_meta_db_is_rejected() {
        assert_matches!(
            meta_url(&PlatformConfig::default()),
            Err(MetaError::Rejected(_))
        );
    }
}
