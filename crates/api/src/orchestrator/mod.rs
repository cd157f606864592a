//! The runtime orchestrator.
//!
//! One [`Orchestrator`] exists per process. The binary constructs it, calls
//! [`Orchestrator::init`] once to boot (see [`startup`]) and serves the
//! router it returns. After boot, runtime changes from the admin dashboard
//! and the metadata manager arrive through one listener and are handled one
//! at a time by the dispatcher (see [`dispatcher`]).

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use axum::Router;
use serde_json::{Map, Value};
use switchyard_core::config::{PlatformConfig, DEFAULT_ENV};
use switchyard_db::{
    InMemoryMetaStore, MetaError, MetaStore, MigrationEngine, PgMetaStore, SqlxMigrationEngine,
};
use switchyard_events::bus::names;
use switchyard_events::{ChangeListener, ChangeStream, EventBus, PlatformEvent};
use tokio::sync::{OnceCell, RwLock};
use tokio_util::sync::CancellationToken;

use crate::admin::{MetaApiManager, MetaManager};
use crate::builder::BuilderContext;
use crate::config::ServerConfig;
use crate::route_table::{ProjectRoutes, RouteTable};
use crate::router::{build_frame, FrameParts};
use crate::state::ActiveConfig;
use crate::telemetry::{ErrorReporter, StatusMonitor};
use crate::upgrader::{Upgrader, VersionedUpgrader};
use crate::variant::{Components, Variant};

pub mod dispatcher;
pub mod migrations;
pub mod registry;
pub mod secret;
pub mod startup;

pub use dispatcher::DispatchError;
pub use migrations::MigrationSummary;
pub use registry::Registry;
pub use startup::{BootError, InitOptions, PostMigrationHook};

/// Queued runtime changes before producers start waiting.
const CHANGE_QUEUE: usize = 64;

/// Collaborators chosen at construction time.
pub struct OrchestratorParts {
    pub meta: Arc<dyn MetaStore>,
    pub migrations: Arc<dyn MigrationEngine>,
    pub upgrader: Arc<dyn Upgrader>,
    pub components: Components,
}

impl OrchestratorParts {
    /// Postgres metadata (in-memory in trial mode), sqlx migrations and the
    /// components of the variant selected by `EE`.
    pub fn production(server: &ServerConfig, config: &PlatformConfig) -> Result<Self, MetaError> {
        let meta: Arc<dyn MetaStore> = if config.trial {
            tracing::info!("Trial mode, metadata kept in memory");
            Arc::new(InMemoryMetaStore::new())
        } else {
            Arc::new(PgMetaStore::connect(config)?)
        };
        Ok(Self {
            meta,
            migrations: Arc::new(SqlxMigrationEngine::new()),
            upgrader: Arc::new(VersionedUpgrader::new()),
            components: Components::for_variant(Variant::from_flag(server.ee)),
        })
    }
}

pub struct Orchestrator {
    server: ServerConfig,
    components: Components,
    meta: Arc<dyn MetaStore>,
    migrations: Arc<dyn MigrationEngine>,
    upgrader: Arc<dyn Upgrader>,
    meta_manager: Arc<dyn MetaManager>,
    active: ActiveConfig,
    registry: Arc<Registry>,
    project_routes: Arc<ProjectRoutes>,
    bus: Arc<EventBus>,
    context: Arc<RwLock<Value>>,
    listener: ChangeListener,
    /// Taken by the dispatcher task at boot.
    stream: Mutex<Option<ChangeStream>>,
    /// Held for the whole handling of one runtime change.
    dispatch_gate: tokio::sync::Mutex<()>,
    reporter: OnceLock<ErrorReporter>,
    monitor: OnceLock<Arc<StatusMonitor>>,
    route_table: OnceLock<Arc<RouteTable>>,
    /// Signing secret resolved at boot.
    secret: OnceCell<Option<String>>,
    boot: OnceCell<Router>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(server: ServerConfig, config: PlatformConfig, parts: OrchestratorParts) -> Arc<Self> {
        let (listener, stream) = switchyard_events::channel(CHANGE_QUEUE);
        let meta_manager = Arc::new(MetaApiManager::new(
            Arc::clone(&parts.meta),
            Arc::new(config.clone()),
        ));

        Arc::new(Self {
            server,
            components: parts.components,
            meta: parts.meta,
            migrations: parts.migrations,
            upgrader: parts.upgrader,
            meta_manager,
            active: ActiveConfig::new(config),
            registry: Arc::new(Registry::new()),
            project_routes: ProjectRoutes::new(),
            bus: Arc::new(EventBus::default()),
            context: Arc::new(RwLock::new(Value::Object(Map::new()))),
            listener,
            stream: Mutex::new(Some(stream)),
            dispatch_gate: tokio::sync::Mutex::new(()),
            reporter: OnceLock::new(),
            monitor: OnceLock::new(),
            route_table: OnceLock::new(),
            secret: OnceCell::new(),
            boot: OnceCell::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Boot once and return the root router. Later calls return the same
    /// router without repeating any startup step.
    pub async fn init(self: &Arc<Self>, options: InitOptions) -> Result<Router, BootError> {
        self.boot
            .get_or_try_init(|| self.boot_sequence(options))
            .await
            .cloned()
    }

    pub fn is_booted(&self) -> bool {
        self.boot.initialized()
    }

    /// The active configuration snapshot.
    pub fn config(&self) -> Arc<PlatformConfig> {
        self.active.current()
    }

    /// The active environment name.
    pub fn env(&self) -> String {
        self.active.env()
    }

    pub fn variant(&self) -> Variant {
        self.components.variant
    }

    /// Public url of the dashboard: the default env's `publicUrl`, else
    /// `http://localhost:{PORT}`, followed by the dashboard path.
    pub fn dashboard_url(&self) -> String {
        let config = self.config();
        let base = config
            .envs
            .get(DEFAULT_ENV)
            .and_then(|env| env.public_url.clone())
            .unwrap_or_else(|| format!("http://localhost:{}", self.server.port));
        format!("{}{}", base.trim_end_matches('/'), config.dashboard_path)
    }

    /// Merge `value` into the context attached to every request. Objects are
    /// merged key by key; anything else replaces the context.
    pub async fn add_to_context(&self, value: Value) {
        let mut context = self.context.write().await;
        match (&mut *context, value) {
            (Value::Object(current), Value::Object(extra)) => current.extend(extra),
            (slot, value) => *slot = value,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn project_routes(&self) -> &Arc<ProjectRoutes> {
        &self.project_routes
    }

    pub fn meta(&self) -> &Arc<dyn MetaStore> {
        &self.meta
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// A handle producers use to submit runtime changes.
    pub fn listener(&self) -> ChangeListener {
        self.listener.clone()
    }

    pub fn route_table(&self) -> Option<Arc<RouteTable>> {
        self.route_table.get().cloned()
    }

    /// The status monitor, once boot has started it.
    pub fn monitor(&self) -> Option<Arc<StatusMonitor>> {
        self.monitor.get().cloned()
    }

    /// Stop the dispatcher and background tasks and unmount every project.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        for project_id in self.project_routes.clear() {
            self.bus
                .publish(PlatformEvent::new(names::PROJECT_UNMOUNTED).for_project(project_id));
        }
        tracing::info!("Orchestrator shut down");
    }

    fn reporter(&self) -> ErrorReporter {
        self.reporter.get().cloned().unwrap_or_default()
    }

    fn take_stream(&self) -> Option<ChangeStream> {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn builder_context(&self) -> BuilderContext {
        BuilderContext {
            routes: Arc::clone(&self.project_routes),
            meta: Arc::clone(&self.meta),
            bus: Arc::clone(&self.bus),
        }
    }

    fn frame(&self, config: &PlatformConfig) -> Router {
        build_frame(FrameParts {
            config,
            env: &config.working_env,
            config_path: self.server.config_path.clone(),
            body_limit: self.server.request_body_size,
            auth: self.components.auth.as_ref(),
            meta_manager: self.meta_manager.as_ref(),
            project_routes: &self.project_routes,
            registry: Arc::clone(&self.registry),
            listener: self.listener.clone(),
            monitor: self.monitor(),
            context: Arc::clone(&self.context),
        })
    }
}
