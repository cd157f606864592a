//! Boot-time migrations for every connection of the active environment.
//!
//! One connection failing does not stop the others or the boot; the failed
//! alias is logged, reported and listed in the [`MigrationSummary`].

use switchyard_core::config::{DbConnection, PlatformConfig};
use switchyard_db::{ApplyOptions, MigrationEngine, MigrationError, MigrationTarget};

use crate::telemetry::ErrorReporter;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    /// Aliases migrated successfully, in connection order.
    pub migrated: Vec<String>,
    /// Aliases whose migration failed.
    pub failed: Vec<String>,
}

impl MigrationSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

async fn migrate_one(
    engine: &dyn MigrationEngine,
    target: &MigrationTarget,
) -> Result<usize, MigrationError> {
    engine.ensure_initialized(target).await?;
    let report = engine.synchronize(target).await?;
    tracing::debug!(
        db_alias = %target.db_alias,
        local = report.local,
        applied = report.applied,
        pending = report.pending,
        "Migration ledger synchronized"
    );
    engine.apply_pending(target, ApplyOptions::default()).await
}

/// Create the metadata database if it is missing.
pub async fn ensure_meta_database(
    engine: &dyn MigrationEngine,
    conn: &DbConnection,
) -> Result<(), MigrationError> {
    if engine.ensure_database(conn).await? {
        tracing::info!(db_alias = %conn.alias(), "Created metadata database");
    }
    Ok(())
}

/// Migrate every connection declared for `env`.
pub async fn run_all(
    engine: &dyn MigrationEngine,
    config: &PlatformConfig,
    env: &str,
    reporter: &ErrorReporter,
) -> MigrationSummary {
    let folder = config.tool_dir();
    let mut summary = MigrationSummary::default();

    for conn in config.connections(env) {
        let target = MigrationTarget::new(&folder, env, conn);
        match migrate_one(engine, &target).await {
            Ok(applied) => {
                tracing::info!(db_alias = %target.db_alias, applied, "Migrations applied");
                summary.migrated.push(target.db_alias);
            }
            Err(e) => {
                tracing::error!(db_alias = %target.db_alias, error = %e, "Migration failed, continuing");
                reporter.report("migration", &e);
                summary.failed.push(target.db_alias);
            }
        }
    }

    if !summary.is_clean() {
        tracing::warn!(
            failed = ?summary.failed,
            migrated = summary.migrated.len(),
            "Some connections were left unmigrated"
        );
    }
    summary
}
