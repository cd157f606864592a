//! Platform configuration object.
//!
//! [`PlatformConfig`] is the parsed form of the on-disk JSON configuration
//! (`config.xc.json` by default). Exactly one instance is active at a time;
//! the orchestrator swaps it wholesale when the environment is switched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment selected at boot when the configuration does not name one.
pub const DEFAULT_ENV: &str = "_noco";

/// Mount path of the administrative dashboard when not configured.
pub const DEFAULT_DASHBOARD_PATH: &str = "/dashboard";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConfig {
    #[serde(default = "default_env")]
    pub working_env: String,
    #[serde(default)]
    pub envs: BTreeMap<String, EnvConfig>,
    #[serde(default)]
    pub meta: MetaConfig,
    #[serde(default = "default_dashboard_path")]
    pub dashboard_path: String,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub tool_dir: Option<PathBuf>,
    #[serde(default)]
    pub public_url: Option<String>,
    /// Trial/ephemeral deployment: in-memory metadata, no migrations.
    #[serde(default, rename = "try")]
    pub trial: bool,
}

/// A named configuration profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvConfig {
    #[serde(default)]
    pub db: Vec<DbConnection>,
    #[serde(default)]
    pub public_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaConfig {
    #[serde(default)]
    pub db: Option<DbConnection>,
}

/// One database connection declared by an environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbConnection {
    #[serde(default = "default_client")]
    pub client: String,
    pub connection: ConnectionSpec,
    pub meta: DbMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    pub url: String,
    #[serde(default)]
    pub database: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbMeta {
    pub db_alias: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwt: Option<JwtAuthConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JwtAuthConfig {
    #[serde(default)]
    pub secret: Option<String>,
}

fn default_env() -> String {
    DEFAULT_ENV.to_string()
}

fn default_dashboard_path() -> String {
    DEFAULT_DASHBOARD_PATH.to_string()
}

fn default_client() -> String {
    "pg".to_string()
}

impl DbConnection {
    pub fn new(alias: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            client: default_client(),
            connection: ConnectionSpec {
                url: url.into(),
                database: None,
            },
            meta: DbMeta {
                db_alias: alias.into(),
            },
        }
    }

    pub fn alias(&self) -> &str {
        &self.meta.db_alias
    }

    /// Database name for log lines; falls back to the alias.
    pub fn display_name(&self) -> &str {
        self.connection
            .database
            .as_deref()
            .unwrap_or(&self.meta.db_alias)
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            working_env: default_env(),
            envs: BTreeMap::new(),
            meta: MetaConfig::default(),
            dashboard_path: default_dashboard_path(),
            auth: None,
            tool_dir: None,
            public_url: None,
            trial: false,
        }
    }
}

impl PlatformConfig {
    /// Read, parse and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PlatformConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize this configuration back to disk (pretty-printed JSON).
    pub fn write(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, raw).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check structural invariants the orchestrator relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.dashboard_path.starts_with('/') || self.dashboard_path == "/" {
            return Err(ConfigError::Invalid(format!(
                "dashboardPath must start with '/' and not be the root, got '{}'",
                self.dashboard_path
            )));
        }

        if !self.envs.is_empty() && !self.envs.contains_key(&self.working_env) {
            return Err(ConfigError::Invalid(format!(
                "workingEnv '{}' is not declared in envs",
                self.working_env
            )));
        }

        let declared = self
            .envs
            .values()
            .flat_map(|env| env.db.iter())
            .chain(self.meta.db.iter());
        for conn in declared {
            if conn.meta.db_alias.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "every db connection needs a non-empty dbAlias".into(),
                ));
            }
            if conn.connection.url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "db connection '{}' has an empty url",
                    conn.meta.db_alias
                )));
            }
        }

        Ok(())
    }

    /// The profile of the working environment, if declared.
    pub fn active_env(&self) -> Option<&EnvConfig> {
        self.envs.get(&self.working_env)
    }

    /// Database connections declared by `env` (empty if the env is unknown).
    pub fn connections(&self, env: &str) -> &[DbConnection] {
        self.envs.get(env).map(|e| e.db.as_slice()).unwrap_or(&[])
    }

    /// Public url for requests: env-level, then global.
    pub fn public_url_for(&self, env: &str) -> Option<&str> {
        self.envs
            .get(env)
            .and_then(|e| e.public_url.as_deref())
            .or(self.public_url.as_deref())
    }

    /// Tool directory, defaulting to the process working directory.
    pub fn tool_dir(&self) -> PathBuf {
        self.tool_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// `<tool_dir>/server/tool/<alias>/migrations`
    pub fn migration_folder(&self, db_alias: &str) -> PathBuf {
        self.tool_dir()
            .join("server")
            .join("tool")
            .join(db_alias)
            .join("migrations")
    }

    /// Whether JWT authentication is declared.
    pub fn jwt_declared(&self) -> bool {
        self.auth.as_ref().is_some_and(|a| a.jwt.is_some())
    }

    pub fn jwt_secret(&self) -> Option<&str> {
        self.auth
            .as_ref()
            .and_then(|a| a.jwt.as_ref())
            .and_then(|j| j.secret.as_deref())
    }

    /// Cache a signing secret; no-op unless JWT auth is declared.
    pub fn set_jwt_secret(&mut self, secret: impl Into<String>) {
        if let Some(jwt) = self.auth.as_mut().and_then(|a| a.jwt.as_mut()) {
            jwt.secret = Some(secret.into());
        }
    }
}
