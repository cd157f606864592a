//! Builds the initial [`PlatformConfig`] for a process.

use std::path::Path;

use switchyard_core::config::{
    AuthConfig, ConfigError, DbConnection, EnvConfig, JwtAuthConfig, MetaConfig, PlatformConfig,
    DEFAULT_ENV,
};

use crate::config::ServerConfig;

/// Alias of the connection synthesized from `NC_DB` / `DATABASE_URL`.
pub const DEFAULT_DB_ALIAS: &str = "db";

/// Load the config file if present, otherwise synthesize a single
/// [`DEFAULT_ENV`] environment from the server settings.
pub fn make(server: &ServerConfig) -> Result<PlatformConfig, ConfigError> {
    let mut config = if server.config_path.exists() {
        tracing::info!(path = %server.config_path.display(), "Loading platform configuration");
        PlatformConfig::load(&server.config_path)?
    } else {
        tracing::info!("No configuration file, using environment defaults");
        synthesize(server)
    };

    apply_server_defaults(&mut config, server);
    config.validate()?;
    Ok(config)
}

/// Re-read the configuration file after an environment switch.
pub fn reload(path: &Path, server: &ServerConfig) -> Result<PlatformConfig, ConfigError> {
    let mut config = PlatformConfig::load(path)?;
    apply_server_defaults(&mut config, server);
    config.validate()?;
    Ok(config)
}

fn synthesize(server: &ServerConfig) -> PlatformConfig {
    let connection = server
        .database_url
        .as_ref()
        .map(|url| DbConnection::new(DEFAULT_DB_ALIAS, url.clone()));

    let mut config = PlatformConfig {
        working_env: DEFAULT_ENV.to_string(),
        meta: MetaConfig {
            db: connection.clone(),
        },
        auth: Some(AuthConfig {
            jwt: Some(JwtAuthConfig::default()),
        }),
        ..PlatformConfig::default()
    };
    config.envs.insert(
        DEFAULT_ENV.to_string(),
        EnvConfig {
            db: connection.into_iter().collect(),
            public_url: server.public_url.clone(),
        },
    );
    config
}

fn apply_server_defaults(config: &mut PlatformConfig, server: &ServerConfig) {
    if config.tool_dir.is_none() {
        config.tool_dir = Some(server.tool_dir.clone());
    }
    if config.public_url.is_none() {
        config.public_url = server.public_url.clone();
    }
    config.trial |= server.trial;
}
