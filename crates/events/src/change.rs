//! Runtime-change events.
//!
//! Producers (the admin dashboard and the meta manager) describe a
//! completed action as `{"req": {"api", "project_id", "args", ...}, "res":
//! {...}}`. [`RuntimeChangeEvent::parse`] resolves the `api` discriminator
//! into a closed set of variants the dispatcher matches on; every other
//! action is carried through as [`RuntimeChangeEvent::Other`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchyard_core::types::ProjectId;

/// Action names used by producers.
pub mod api {
    pub const PROJECT_CREATE_BY_WEB: &str = "projectCreateByWeb";
    pub const PROJECT_CREATE_BY_ONE_CLICK: &str = "projectCreateByOneClick";
    pub const PROJECT_CREATE_BY_WEB_WITH_XCDB: &str = "projectCreateByWebWithXCDB";
    pub const IMPORT_ZIP_TO_LOCAL_FS_AND_DB: &str = "xcMetaTablesImportZipToLocalFsAndDb";
    pub const PROJECT_UPDATE_BY_WEB: &str = "projectUpdateByWeb";
    pub const PROJECT_CHANGE_ENV: &str = "projectChangeEnv";
    pub const PROJECT_START: &str = "projectStart";
    pub const PROJECT_STOP: &str = "projectStop";
    pub const PROJECT_RESTART: &str = "projectRestart";
}

#[derive(Debug, thiserror::Error)]
pub enum ChangeError {
    #[error("Runtime change payload has no req.api")]
    MissingApi,

    #[error("Runtime change '{api}' is missing {field}")]
    MissingField { api: String, field: &'static str },

    #[error("Malformed runtime change payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Request/response pair as reported by the producer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangePayload {
    #[serde(default)]
    pub req: Value,
    #[serde(default)]
    pub res: Value,
}

impl ChangePayload {
    pub fn new(req: Value, res: Value) -> Self {
        Self { req, res }
    }

    pub fn api(&self) -> Option<&str> {
        self.req.get("api").and_then(Value::as_str)
    }

    /// `req.project_id`, accepting string or numeric ids.
    pub fn req_project_id(&self) -> Option<ProjectId> {
        self.req.get("project_id").and_then(id_value)
    }

    /// `res.id` of the record the action produced.
    pub fn res_id(&self) -> Option<ProjectId> {
        self.res.get("id").and_then(id_value)
    }

    pub fn args(&self) -> &Value {
        self.req.get("args").unwrap_or(&Value::Null)
    }

    /// `req.freshImport`, falling back to `req.args.freshImport`.
    pub fn fresh_import(&self) -> bool {
        self.req
            .get("freshImport")
            .or_else(|| self.args().get("freshImport"))
            .is_some_and(truthy)
    }
}

fn id_value(value: &Value) -> Option<ProjectId> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Which producer flow created a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateSource {
    Web,
    OneClick,
    WebWithExternalDb,
}

impl CreateSource {
    pub fn api(self) -> &'static str {
        match self {
            CreateSource::Web => api::PROJECT_CREATE_BY_WEB,
            CreateSource::OneClick => api::PROJECT_CREATE_BY_ONE_CLICK,
            CreateSource::WebWithExternalDb => api::PROJECT_CREATE_BY_WEB_WITH_XCDB,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeChangeEvent {
    /// A project row was created; `project_id` comes from `res.id`.
    ProjectCreated {
        source: CreateSource,
        project_id: ProjectId,
        payload: ChangePayload,
    },

    /// Project data was bulk-imported.
    ProjectsImported {
        project_id: ProjectId,
        fresh: bool,
        payload: ChangePayload,
    },

    ProjectUpdated {
        project_id: ProjectId,
        payload: ChangePayload,
    },

    /// The working environment was switched; `env` is `req.args.env`.
    EnvironmentSwitched {
        env: Option<String>,
        payload: ChangePayload,
    },

    /// Any other action, forwarded to the builder named by `project_id`.
    Other {
        api: String,
        project_id: Option<ProjectId>,
        payload: ChangePayload,
    },
}

impl RuntimeChangeEvent {
    pub fn parse(payload: ChangePayload) -> Result<Self, ChangeError> {
        let api = payload.api().ok_or(ChangeError::MissingApi)?.to_string();

        let missing = |field| ChangeError::MissingField {
            api: api.clone(),
            field,
        };

        let source = match api.as_str() {
            api::PROJECT_CREATE_BY_WEB => Some(CreateSource::Web),
            api::PROJECT_CREATE_BY_ONE_CLICK => Some(CreateSource::OneClick),
            api::PROJECT_CREATE_BY_WEB_WITH_XCDB => Some(CreateSource::WebWithExternalDb),
            _ => None,
        };
        if let Some(source) = source {
            let project_id = payload.res_id().ok_or_else(|| missing("res.id"))?;
            return Ok(Self::ProjectCreated {
                source,
                project_id,
                payload,
            });
        }

        let event = match api.as_str() {
            api::IMPORT_ZIP_TO_LOCAL_FS_AND_DB => Self::ProjectsImported {
                project_id: payload
                    .req_project_id()
                    .ok_or_else(|| missing("req.project_id"))?,
                fresh: payload.fresh_import(),
                payload,
            },
            api::PROJECT_UPDATE_BY_WEB => Self::ProjectUpdated {
                project_id: payload
                    .req_project_id()
                    .ok_or_else(|| missing("req.project_id"))?,
                payload,
            },
            api::PROJECT_CHANGE_ENV => Self::EnvironmentSwitched {
                env: payload
                    .args()
                    .get("env")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                payload,
            },
            _ => Self::Other {
                project_id: payload.req_project_id(),
                api,
                payload,
            },
        };
        Ok(event)
    }

    /// Parse a raw `{"req", "res"}` JSON value.
    pub fn from_value(value: Value) -> Result<Self, ChangeError> {
        Self::parse(serde_json::from_value(value)?)
    }

    /// Build an event from an action request and its result.
    pub fn from_action(req: Value, res: Value) -> Result<Self, ChangeError> {
        Self::parse(ChangePayload::new(req, res))
    }

    pub fn api(&self) -> &str {
        match self {
            Self::ProjectCreated { source, .. } => source.api(),
            Self::ProjectsImported { .. } => api::IMPORT_ZIP_TO_LOCAL_FS_AND_DB,
            Self::ProjectUpdated { .. } => api::PROJECT_UPDATE_BY_WEB,
            Self::EnvironmentSwitched { .. } => api::PROJECT_CHANGE_ENV,
            Self::Other { api, .. } => api,
        }
    }

    pub fn project_id(&self) -> Option<&str> {
        match self {
            Self::ProjectCreated { project_id, .. }
            | Self::ProjectsImported { project_id, .. }
            | Self::ProjectUpdated { project_id, .. } => Some(project_id),
            Self::EnvironmentSwitched { .. } => None,
            Self::Other { project_id, .. } => project_id.as_deref(),
        }
    }

    pub fn payload(&self) -> &ChangePayload {
        match self {
            Self::ProjectCreated { payload, .. }
            | Self::ProjectsImported { payload, .. }
            | Self::ProjectUpdated { payload, .. }
            | Self::EnvironmentSwitched { payload, .. }
            | Self::Other { payload, .. } => payload,
        }
    }
}
