//! Per-connection schema migrations.
//!
//! Each database connection declared by the active environment has its own
//! migration folder (`<tool_dir>/server/tool/<alias>/migrations`) holding
//! sqlx-style `<version>_<description>.sql` files. [`SqlxMigrationEngine`]
//! creates the folder and ledger table, checks the ledger against the
//! local files and applies pending migrations in version order.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use sqlx::migrate::{Migrate, MigrateError, Migration, Migrator};
use switchyard_core::config::DbConnection;
use tokio::sync::Mutex;

use crate::{create_pool, ensure_database, DbPool};

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Failed to prepare migration folder {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] MigrateError),

    #[error("Database '{db_alias}' has a partially applied migration {version}")]
    Dirty { db_alias: String, version: i64 },

    #[error("Migration {version} of '{db_alias}' was modified after it was applied")]
    ChecksumMismatch { db_alias: String, version: i64 },

    #[error("Unsupported database client '{0}'")]
    UnsupportedClient(String),
}

/// One database connection to migrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationTarget {
    /// Tool directory the migration folders live under.
    pub folder: PathBuf,
    pub env: String,
    pub db_alias: String,
    pub url: String,
}

impl MigrationTarget {
    pub fn new(folder: impl Into<PathBuf>, env: impl Into<String>, conn: &DbConnection) -> Self {
        Self {
            folder: folder.into(),
            env: env.into(),
            db_alias: conn.alias().to_string(),
            url: conn.connection.url.clone(),
        }
    }

    /// `<folder>/server/tool/<alias>/migrations`
    pub fn migrations_dir(&self) -> PathBuf {
        self.folder
            .join("server")
            .join("tool")
            .join(&self.db_alias)
            .join("migrations")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Upper bound on migrations applied in one call.
    pub max_steps: usize,
    /// When false, pending migrations are only reported, not executed.
    pub run_sql_content: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            max_steps: 99_999,
            run_sql_content: true,
        }
    }
}

/// Ledger state after [`MigrationEngine::synchronize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub local: usize,
    pub applied: usize,
    pub pending: usize,
}

/// Brings a database's schema up to date with its migration folder.
#[async_trait]
pub trait MigrationEngine: Send + Sync {
    /// Create the database itself if missing; returns `true` if created.
    async fn ensure_database(&self, conn: &DbConnection) -> Result<bool, MigrationError>;

    /// Create the migration folder and ledger table.
    async fn ensure_initialized(&self, target: &MigrationTarget) -> Result<(), MigrationError>;

    /// Reconcile the ledger with the local migration files.
    async fn synchronize(&self, target: &MigrationTarget) -> Result<SyncReport, MigrationError>;

    /// Apply pending migrations; returns how many ran.
    async fn apply_pending(
        &self,
        target: &MigrationTarget,
        options: ApplyOptions,
    ) -> Result<usize, MigrationError>;
}

/// [`MigrationEngine`] over sqlx's migration ledger (`_sqlx_migrations`).
#[derive(Default)]
pub struct SqlxMigrationEngine {
    pools: Mutex<HashMap<String, DbPool>>,
}

fn check_client(client: &str) -> Result<(), MigrationError> {
    match client {
        "pg" | "postgres" | "postgresql" => Ok(()),
        other => Err(MigrationError::UnsupportedClient(other.to_string())),
    }
}

fn up_migrations(migrator: &Migrator) -> impl Iterator<Item = &Migration> {
    migrator
        .iter()
        .filter(|m| !m.migration_type.is_down_migration())
}

impl SqlxMigrationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    async fn pool_for(&self, url: &str) -> Result<DbPool, MigrationError> {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(url) {
            return Ok(pool.clone());
        }
        let pool = create_pool(url).await?;
        pools.insert(url.to_string(), pool.clone());
        Ok(pool)
    }

    async fn local_migrations(&self, target: &MigrationTarget) -> Result<Migrator, MigrationError> {
        Ok(Migrator::new(target.migrations_dir()).await?)
    }
}

#[async_trait]
impl MigrationEngine for SqlxMigrationEngine {
    async fn ensure_database(&self, conn: &DbConnection) -> Result<bool, MigrationError> {
        check_client(&conn.client)?;
        Ok(ensure_database(&conn.connection.url).await?)
    }

    async fn ensure_initialized(&self, target: &MigrationTarget) -> Result<(), MigrationError> {
        let dir = target.migrations_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| MigrationError::Io {
                path: dir.clone(),
                source,
            })?;

        let pool = self.pool_for(&target.url).await?;
        let mut conn = pool.acquire().await?;
        conn.ensure_migrations_table().await?;

        tracing::info!(db_alias = %target.db_alias, path = %dir.display(), "Migration folder initialized");
        Ok(())
    }

    async fn synchronize(&self, target: &MigrationTarget) -> Result<SyncReport, MigrationError> {
        let migrator = self.local_migrations(target).await?;
        let pool = self.pool_for(&target.url).await?;
        let mut conn = pool.acquire().await?;

        conn.ensure_migrations_table().await?;
        if let Some(version) = conn.dirty_version().await? {
            return Err(MigrationError::Dirty {
                db_alias: target.db_alias.clone(),
                version,
            });
        }

        let applied: HashMap<i64, _> = conn
            .list_applied_migrations()
            .await?
            .into_iter()
            .map(|m| (m.version, m.checksum))
            .collect();

        let mut report = SyncReport {
            applied: applied.len(),
            ..SyncReport::default()
        };
        for migration in up_migrations(&migrator) {
            report.local += 1;
            match applied.get(&migration.version) {
                Some(checksum) if *checksum != migration.checksum => {
                    return Err(MigrationError::ChecksumMismatch {
                        db_alias: target.db_alias.clone(),
                        version: migration.version,
                    });
                }
                Some(_) => {}
                None => report.pending += 1,
            }
        }

        let orphaned = applied
            .keys()
            .filter(|v| !up_migrations(&migrator).any(|m| m.version == **v))
            .count();
        if orphaned > 0 {
            tracing::warn!(db_alias = %target.db_alias, orphaned, "Applied migrations missing from folder");
        }

        Ok(report)
    }

    async fn apply_pending(
        &self,
        target: &MigrationTarget,
        options: ApplyOptions,
    ) -> Result<usize, MigrationError> {
        let migrator = self.local_migrations(target).await?;
        let pool = self.pool_for(&target.url).await?;
        let mut conn = pool.acquire().await?;

        conn.ensure_migrations_table().await?;
        conn.lock().await?;

        let result: Result<usize, MigrationError> = async {
            if let Some(version) = conn.dirty_version().await? {
                return Err(MigrationError::Dirty {
                    db_alias: target.db_alias.clone(),
                    version,
                });
            }

            let applied: Vec<i64> = conn
                .list_applied_migrations()
                .await?
                .into_iter()
                .map(|m| m.version)
                .collect();

            let pending: Vec<&Migration> = up_migrations(&migrator)
                .filter(|m| !applied.contains(&m.version))
                .take(options.max_steps)
                .collect();

            if !options.run_sql_content {
                for migration in &pending {
                    tracing::info!(
                        db_alias = %target.db_alias,
                        version = migration.version,
                        description = %migration.description,
                        "Pending migration (not executed)",
                    );
                }
                return Ok(0);
            }

            for migration in &pending {
                let elapsed = conn.apply(migration).await?;
                tracing::info!(
                    db_alias = %target.db_alias,
                    version = migration.version,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Migration applied",
                );
            }
            Ok(pending.len())
        }
        .await;

        conn.unlock().await?;
        result
    }
}
