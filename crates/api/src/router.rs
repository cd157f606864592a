//! Frame assembly.
//!
//! A frame is everything served below the root: the fixed middleware chain,
//! the auth routes, the guarded project subtree, the metadata manager, the
//! dashboard and static assets. Boot builds the first frame; an environment
//! switch builds a complete new one and swaps it into the [`RouteTable`].
//!
//! [`RouteTable`]: crate::route_table::RouteTable

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::Redirect;
use axum::routing::get;
use axum::Router;
use serde_json::Value;
use switchyard_core::config::PlatformConfig;
use switchyard_events::ChangeListener;
use tokio::sync::RwLock;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::admin::{AdminDashboard, MetaManager};
use crate::auth::controller::AuthController;
use crate::error::panic_response;
use crate::middleware::context::ContextState;
use crate::middleware::{audit, body, client_ip, context, cookies, project_scope};
use crate::orchestrator::registry::Registry;
use crate::route_table::ProjectRoutes;
use crate::routes::health::{self, HealthState};
use crate::telemetry::StatusMonitor;

/// Inputs for one frame.
pub struct FrameParts<'a> {
    pub config: &'a PlatformConfig,
    pub env: &'a str,
    pub config_path: PathBuf,
    pub body_limit: usize,
    pub auth: &'a dyn AuthController,
    pub meta_manager: &'a dyn MetaManager,
    pub project_routes: &'a Arc<ProjectRoutes>,
    pub registry: Arc<Registry>,
    pub listener: ChangeListener,
    pub monitor: Option<Arc<StatusMonitor>>,
    pub context: Arc<RwLock<Value>>,
}

pub fn build_frame(parts: FrameParts<'_>) -> Router {
    let config = parts.config;
    let dashboard_path = config.dashboard_path.clone();
    let redirect_to = dashboard_path.clone();

    let dashboard = AdminDashboard::new(config, parts.config_path, parts.listener, parts.monitor);
    let health = health::router().with_state(HealthState {
        env: parts.env.to_string(),
        registry: parts.registry,
    });
    let context_state = ContextState {
        public_url: config.public_url_for(parts.env).map(str::to_string),
        extra: parts.context,
    };
    let assets = ServeDir::new(config.tool_dir().join("public"));

    Router::new()
        .route(
            "/",
            get(move || std::future::ready(Redirect::temporary(&redirect_to))),
        )
        .merge(health)
        .merge(parts.auth.routes())
        .merge(parts.meta_manager.routes())
        .merge(parts.auth.guard(parts.project_routes.router()))
        .nest(&dashboard_path, dashboard.routes())
        .fallback_service(assets)
        // Innermost first: audit sees the scope, scope sees the parsed body.
        .layer(from_fn(audit::log_request))
        .layer(from_fn(project_scope::extract))
        .layer(from_fn_with_state(parts.body_limit, body::parse_json))
        .layer(from_fn(cookies::parse_cookies))
        .layer(from_fn(client_ip::extract))
        .layer(from_fn_with_state(context_state, context::inject))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(parts.body_limit))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
