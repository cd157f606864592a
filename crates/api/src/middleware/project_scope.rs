//! Project-id extraction.

use axum::extract::Request;
use axum::http::Uri;
use axum::middleware::Next;
use axum::response::Response;
use switchyard_core::types::ProjectId;

use crate::middleware::body::JsonBody;

/// The project a request targets, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectScope(pub Option<ProjectId>);

impl ProjectScope {
    pub fn project_id(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

fn query_project_id(uri: &Uri) -> Option<ProjectId> {
    uri.query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "project_id")
        .map(|(_, value)| value.to_string())
        .filter(|id| !id.is_empty())
}

fn body_project_id(body: &serde_json::Value) -> Option<ProjectId> {
    match body.get("project_id")? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn path_project_id(uri: &Uri) -> Option<ProjectId> {
    let mut segments = uri.path().trim_start_matches('/').split('/');
    match (segments.next(), segments.next()) {
        (Some("nc"), Some(id)) if !id.is_empty() => Some(id.to_string()),
        _ => None,
    }
}

/// Query `project_id`, then body `project_id`, then `/nc/{id}/...`.
pub fn resolve(uri: &Uri, body: Option<&serde_json::Value>) -> Option<ProjectId> {
    query_project_id(uri)
        .or_else(|| body.and_then(body_project_id))
        .or_else(|| path_project_id(uri))
}

pub async fn extract(mut req: Request, next: Next) -> Response {
    let body = req.extensions().get::<JsonBody>().map(|JsonBody(v)| v);
    let scope = ProjectScope(resolve(req.uri(), body));
    req.extensions_mut().insert(scope);
    next.run(req).await
}
