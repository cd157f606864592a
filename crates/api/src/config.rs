use std::path::PathBuf;

use switchyard_core::config::ConfigError;

/// Default cap on request bodies (1 MiB).
const DEFAULT_BODY_SIZE: usize = 1_048_576;

/// Process-level settings loaded from environment variables.
///
/// Everything about tenants and databases lives in the
/// [`PlatformConfig`](switchyard_core::config::PlatformConfig) built from
/// these by [`config_factory::make`](crate::config_factory::make).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8080`).
    pub port: u16,
    /// Request body cap in bytes.
    pub request_body_size: usize,
    /// Error-report sink endpoint.
    pub sentry_dsn: Option<String>,
    /// Enterprise variant selected.
    pub ee: bool,
    pub tool_dir: PathBuf,
    /// On-disk platform configuration, re-read on environment switch.
    pub config_path: PathBuf,
    /// Metadata database url used when no config file exists.
    pub database_url: Option<String>,
    /// Trial deployment: in-memory metadata, no migrations.
    pub trial: bool,
    /// Port of the standalone status transport, if any.
    pub status_port: Option<u16>,
    pub public_url: Option<String>,
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                | Default                       |
    /// |------------------------|-------------------------------|
    /// | `HOST`                 | `0.0.0.0`                     |
    /// | `PORT`                 | `8080`                        |
    /// | `NC_REQUEST_BODY_SIZE` | `1048576`                     |
    /// | `NC_SENTRY_DSN`        | --                            |
    /// | `EE`                   | --                            |
    /// | `NC_TOOL_DIR`          | current directory             |
    /// | `NC_CONFIG_PATH`       | `<tool_dir>/config.xc.json`   |
    /// | `NC_DB`/`DATABASE_URL` | --                            |
    /// | `NC_TRY`               | --                            |
    /// | `NC_STATUS_PORT`       | --                            |
    /// | `NC_PUBLIC_URL`        | --                            |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parse_var(&var, "PORT")?.unwrap_or(8080);
        let request_body_size = parse_var(&var, "NC_REQUEST_BODY_SIZE")?.unwrap_or(DEFAULT_BODY_SIZE);
        let status_port = parse_var(&var, "NC_STATUS_PORT")?;

        let tool_dir = var("NC_TOOL_DIR")
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let config_path = var("NC_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| tool_dir.join("config.xc.json"));

        Ok(Self {
            host,
            port,
            request_body_size,
            sentry_dsn: var("NC_SENTRY_DSN"),
            ee: var("EE").is_some(),
            tool_dir,
            config_path,
            database_url: var("NC_DB").or_else(|| var("DATABASE_URL")),
            trial: var("NC_TRY").is_some_and(|v| v != "false" && v != "0"),
            status_port,
            public_url: var("NC_PUBLIC_URL"),
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    var(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{key} must be a number, got '{raw}'")))
        })
        .transpose()
}
