//! Metadata persistence for switchyard.
//!
//! - [`meta`] -- the [`MetaStore`](meta::MetaStore) capability interface.
//! - [`pg`] -- Postgres-backed store (production).
//! - [`memory`] -- in-memory store (trial mode and tests).
//! - [`migrator`] -- per-connection schema migrations.

use sqlx::migrate::MigrateDatabase;
use sqlx::postgres::PgPoolOptions;

pub mod memory;
pub mod meta;
pub mod migrator;
pub mod pg;

pub use memory::InMemoryMetaStore;
pub use meta::{MetaError, MetaScope, MetaStore, MetaTable, Record};
pub use migrator::{
    ApplyOptions, MigrationEngine, MigrationError, MigrationTarget, SqlxMigrationEngine,
    SyncReport,
};
pub use pg::PgMetaStore;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}

/// Create a pool that connects on first use.
pub fn create_lazy_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect_lazy(database_url)
}

/// Round-trip a trivial query to verify the pool is usable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the metadata schema migrations embedded in this crate.
pub async fn run_meta_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Create the database behind `database_url` if it does not exist yet.
///
/// Returns `true` when the database was created.
pub async fn ensure_database(database_url: &str) -> Result<bool, sqlx::Error> {
    if sqlx::Postgres::database_exists(database_url).await? {
        return Ok(false);
    }
    sqlx::Postgres::create_database(database_url).await?;
    tracing::info!("Created metadata database");
    Ok(true)
}
