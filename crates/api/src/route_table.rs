//! Swappable route frames.
//!
//! The process serves [`RouteTable::root_router`] for its whole lifetime.
//! That router owns no routes itself: its fallback forwards each request
//! into whatever frame is current, so an environment switch can build a
//! complete replacement frame off to the side and swap it in one step.
//! Requests already inside the old frame finish against it.
//!
//! [`ProjectRoutes`] is the per-project table shared by every frame.
//! Builders mount and unmount their own router there without touching the
//! frame.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use axum::extract::{Path, Request, State};
use axum::http::uri::PathAndQuery;
use axum::http::{StatusCode, Uri};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use switchyard_core::types::ProjectId;
use tower::ServiceExt;

use crate::error::error_body;

async fn serve(router: Router, req: Request) -> Response {
    match router.oneshot(req).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

// ---------------------------------------------------------------------------
// RouteTable
// ---------------------------------------------------------------------------

pub struct RouteTable {
    current: RwLock<Router>,
}

impl RouteTable {
    pub fn new(frame: Router) -> Arc<Self> {
        Arc::new(Self {
            current: RwLock::new(frame),
        })
    }

    /// Swap in a fully built frame.
    pub fn replace(&self, frame: Router) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = frame;
        tracing::info!("Route frame replaced");
    }

    pub fn current(&self) -> Router {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The long-lived router handed to the server.
    pub fn root_router(self: &Arc<Self>) -> Router {
        Router::new()
            .fallback(forward_to_frame)
            .with_state(Arc::clone(self))
    }
}

async fn forward_to_frame(State(table): State<Arc<RouteTable>>, req: Request) -> Response {
    serve(table.current(), req).await
}

// ---------------------------------------------------------------------------
// ProjectRoutes
// ---------------------------------------------------------------------------

/// Live project routers, keyed by project id. Each router is rooted at `/`
/// and sees request paths with the `/nc/{project_id}` prefix removed.
#[derive(Default)]
pub struct ProjectRoutes {
    routes: RwLock<HashMap<ProjectId, Router>>,
}

impl ProjectRoutes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mount `router` for `project_id`, replacing any previous one.
    pub fn mount(&self, project_id: &str, router: Router) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(project_id.to_string(), router);
    }

    /// Returns `true` if a router was mounted for `project_id`.
    pub fn unmount(&self, project_id: &str) -> bool {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(project_id)
            .is_some()
    }

    pub fn is_mounted(&self, project_id: &str) -> bool {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(project_id)
    }

    pub fn mounted(&self) -> Vec<ProjectId> {
        let mut ids: Vec<_> = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Drop every mounted router; returns the ids that were mounted.
    pub fn clear(&self) -> Vec<ProjectId> {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        routes.drain().map(|(id, _)| id).collect()
    }

    fn get(&self, project_id: &str) -> Option<Router> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(project_id)
            .cloned()
    }

    /// The `/nc/{project_id}` subtree, mounted once per frame.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/nc/{project_id}", any(forward_to_project))
            .route("/nc/{project_id}/{*rest}", any(forward_to_project))
            .with_state(Arc::clone(self))
    }
}

/// `/nc/{id}/api/v1/_info?x=1` becomes `/api/v1/_info?x=1`.
fn strip_project_prefix(uri: &Uri) -> Option<Uri> {
    let rest = uri.path().strip_prefix("/nc/")?;
    let tail = rest.find('/').map_or("/", |i| &rest[i..]);
    let path_and_query = match uri.query() {
        Some(query) => format!("{tail}?{query}"),
        None => tail.to_string(),
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query).ok()?);
    Uri::from_parts(parts).ok()
}

async fn forward_to_project(
    State(routes): State<Arc<ProjectRoutes>>,
    Path(params): Path<HashMap<String, String>>,
    mut req: Request,
) -> Response {
    let Some(project_id) = params.get("project_id") else {
        return error_body(StatusCode::BAD_REQUEST, "Missing project id");
    };
    let Some(router) = routes.get(project_id) else {
        return error_body(
            StatusCode::NOT_FOUND,
            format!("Project '{project_id}' is not mounted"),
        );
    };
    let Some(uri) = strip_project_prefix(req.uri()) else {
        return error_body(StatusCode::BAD_REQUEST, "Malformed project path");
    };
    *req.uri_mut() = uri;
    serve(router, req).await
}
