//! JWT signing secret bootstrap.
//!
//! The secret lives in `nc_store` under [`JWT_SECRET_KEY`]. A persisted
//! value always wins: when two processes race to generate one, the loser's
//! insert hits the unique key and it re-reads the winner's value.

use serde_json::{json, Value};
use switchyard_core::config::PlatformConfig;
use switchyard_db::meta::record;
use switchyard_db::{MetaError, MetaScope, MetaStore, MetaTable};

pub const JWT_SECRET_KEY: &str = "nc_auth_jwt_secret";

async fn read(meta: &dyn MetaStore) -> Result<Option<String>, MetaError> {
    let found = meta
        .get_record(
            &MetaScope::global(),
            MetaTable::Store,
            &record([("key", json!(JWT_SECRET_KEY))]),
        )
        .await?;
    Ok(found
        .and_then(|r| r.get("value").and_then(Value::as_str).map(str::to_string))
        .filter(|s| !s.is_empty()))
}

/// Resolve the signing secret and cache it in `config`.
///
/// Returns `None` when the configuration declares no JWT auth. A secret
/// already present in the configuration is used as is.
pub async fn bootstrap(
    meta: &dyn MetaStore,
    config: &mut PlatformConfig,
) -> Result<Option<String>, MetaError> {
    if !config.jwt_declared() {
        return Ok(None);
    }
    if let Some(secret) = config.jwt_secret() {
        return Ok(Some(secret.to_string()));
    }

    let secret = match read(meta).await? {
        Some(persisted) => {
            tracing::debug!("Using persisted JWT secret");
            persisted
        }
        None => {
            let generated = uuid::Uuid::new_v4().to_string();
            let inserted = meta
                .insert_record(
                    &MetaScope::global(),
                    MetaTable::Store,
                    record([("key", json!(JWT_SECRET_KEY)), ("value", json!(generated))]),
                )
                .await;
            match inserted {
                Ok(()) => {
                    tracing::info!("Generated and persisted a new JWT secret");
                    generated
                }
                Err(MetaError::Conflict { .. }) => {
                    tracing::warn!("JWT secret persisted concurrently, using stored value");
                    read(meta).await?.ok_or_else(|| {
                        MetaError::Rejected("JWT secret vanished after conflict".into())
                    })?
                }
                Err(e) => return Err(e),
            }
        }
    };

    config.set_jwt_secret(secret.clone());
    Ok(Some(secret))
}
