//! Request-context injection.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::AppError;

/// Per-request context attached to every request's extensions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestContext {
    /// Public base url of the site, without a trailing slash.
    pub site_url: String,
    /// `site_url` plus the request path and query.
    pub full_url: String,
    /// Process-wide context registered through the orchestrator.
    pub extra: serde_json::Value,
}

/// State for [`inject`]: the configured public url and the shared extra
/// context.
#[derive(Clone)]
pub struct ContextState {
    pub public_url: Option<String>,
    pub extra: Arc<RwLock<serde_json::Value>>,
}

/// `public_url` if configured, otherwise `scheme://host` of the request.
pub fn site_url(public_url: Option<&str>, headers: &HeaderMap) -> String {
    if let Some(url) = public_url {
        return url.trim_end_matches('/').to_string();
    }
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let scheme = header("x-forwarded-proto").unwrap_or("http");
    let host = header("x-forwarded-host")
        .or_else(|| header("host"))
        .unwrap_or("localhost");
    format!("{scheme}://{host}")
}

pub async fn inject(State(state): State<ContextState>, mut req: Request, next: Next) -> Response {
    let site_url = site_url(state.public_url.as_deref(), req.headers());
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let context = RequestContext {
        full_url: format!("{site_url}{path}"),
        site_url,
        extra: state.extra.read().await.clone(),
    };
    req.extensions_mut().insert(context);
    next.run(req).await
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| AppError::Internal("Request context middleware not installed".into()))
    }
}
