//! Shared fixtures for orchestrator integration tests.
//!
//! Every harness runs against the in-memory metadata store and a recording
//! migration engine, so no test needs a database.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::routing;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use switchyard_api::builder::{BuilderContext, BuilderError, BuilderFactory, ProjectBuilder};
use switchyard_api::config::ServerConfig;
use switchyard_api::config_factory;
use switchyard_api::upgrader::{UpgradeError, UpgradeReport, Upgrader, VersionedUpgrader};
use switchyard_api::variant::{Components, Variant};
use switchyard_api::{InitOptions, Orchestrator, OrchestratorParts};
use switchyard_core::config::{DbConnection, PlatformConfig};
use switchyard_core::project::Project;
use switchyard_db::{
    ApplyOptions, InMemoryMetaStore, MetaError, MetaScope, MetaStore, MetaTable, MigrationEngine,
    MigrationError, MigrationTarget, Record, SyncReport,
};
use switchyard_events::RuntimeChangeEvent;
use tempfile::TempDir;
use tower::ServiceExt;

pub const META_URL: &str = "postgres://switchyard@localhost/switchyard_meta";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Server settings rooted at `dir`, with no config file on disk.
pub fn server_config(dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 8080,
        request_body_size: 64 * 1024,
        sentry_dsn: None,
        ee: false,
        tool_dir: dir.to_path_buf(),
        config_path: dir.join("config.xc.json"),
        database_url: Some(META_URL.to_string()),
        trial: false,
        status_port: None,
        public_url: None,
    }
}

pub fn platform_config(server: &ServerConfig) -> PlatformConfig {
    config_factory::make(server).unwrap()
}

// ---------------------------------------------------------------------------
// Migration engine
// ---------------------------------------------------------------------------

/// Records every call; aliases in `failing` fail at `apply_pending`.
#[derive(Default)]
pub struct RecordingMigrations {
    calls: Mutex<Vec<String>>,
    failing: HashSet<String>,
}

impl RecordingMigrations {
    pub fn failing(aliases: &[&str]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MigrationEngine for RecordingMigrations {
    async fn ensure_database(&self, conn: &DbConnection) -> Result<bool, MigrationError> {
        self.record(format!("ensure_database:{}", conn.alias()));
        Ok(false)
    }

    async fn ensure_initialized(&self, target: &MigrationTarget) -> Result<(), MigrationError> {
        self.record(format!("init:{}", target.db_alias));
        Ok(())
    }

    async fn synchronize(&self, target: &MigrationTarget) -> Result<SyncReport, MigrationError> {
        self.record(format!("sync:{}", target.db_alias));
        Ok(SyncReport::default())
    }

    async fn apply_pending(
        &self,
        target: &MigrationTarget,
        _options: ApplyOptions,
    ) -> Result<usize, MigrationError> {
        self.record(format!("apply:{}", target.db_alias));
        if self.failing.contains(&target.db_alias) {
            return Err(MigrationError::Dirty {
                db_alias: target.db_alias.clone(),
                version: 3,
            });
        }
        Ok(0)
    }
}

// ---------------------------------------------------------------------------
// Upgrader
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CountingUpgrader {
    runs: Mutex<usize>,
    inner: VersionedUpgrader,
}

impl CountingUpgrader {
    pub fn runs(&self) -> usize {
        *self.runs.lock().unwrap()
    }
}

#[async_trait]
impl Upgrader for CountingUpgrader {
    async fn upgrade(&self, meta: &dyn MetaStore) -> Result<UpgradeReport, UpgradeError> {
        *self.runs.lock().unwrap() += 1;
        self.inner.upgrade(meta).await
    }
}

// ---------------------------------------------------------------------------
// Tracing builder
// ---------------------------------------------------------------------------

/// Shared, ordered log of builder calls.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Builder that logs entry and exit of every call and takes `delay` inside
/// `handle_runtime_change`.
pub struct TracingBuilder {
    id: String,
    ctx: BuilderContext,
    log: CallLog,
    delay: Duration,
}

#[async_trait]
impl ProjectBuilder for TracingBuilder {
    fn id(&self) -> &str {
        &self.id
    }

    async fn init(&self, fresh: bool) -> Result<(), BuilderError> {
        self.log.lock().unwrap().push(format!("init:{}:{fresh}", self.id));
        let id = self.id.clone();
        self.ctx.routes.mount(
            &self.id,
            Router::new().route("/ping", routing::get(move || std::future::ready(id.clone()))),
        );
        Ok(())
    }

    async fn reinit(&self) -> Result<(), BuilderError> {
        self.log.lock().unwrap().push(format!("reinit:{}", self.id));
        Ok(())
    }

    fn update_config(&self, _config: Value) {
        self.log.lock().unwrap().push(format!("update_config:{}", self.id));
    }

    async fn handle_runtime_change(
        &self,
        event: &RuntimeChangeEvent,
    ) -> Result<Option<Value>, BuilderError> {
        let tag = event
            .payload()
            .args()
            .get("tag")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.log.lock().unwrap().push(format!("begin:{tag}"));
        tokio::time::sleep(self.delay).await;
        self.log.lock().unwrap().push(format!("end:{tag}"));
        Ok(Some(Value::String(tag)))
    }
}

pub struct TracingFactory {
    pub log: CallLog,
    pub delay: Duration,
}

impl TracingFactory {
    pub fn new(delay: Duration) -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            delay,
        }
    }
}

impl BuilderFactory for TracingFactory {
    fn create(&self, project: Project, ctx: BuilderContext) -> Arc<dyn ProjectBuilder> {
        self.log.lock().unwrap().push(format!("create:{}", project.id));
        Arc::new(TracingBuilder {
            id: project.id,
            ctx,
            log: Arc::clone(&self.log),
            delay: self.delay,
        })
    }
}

// ---------------------------------------------------------------------------
// Metadata store that refuses configuration swaps
// ---------------------------------------------------------------------------

/// Delegates to an in-memory store but rejects every `set_active_config`.
pub struct PinnedConfigMeta {
    inner: Arc<InMemoryMetaStore>,
}

#[async_trait]
impl MetaStore for PinnedConfigMeta {
    async fn init(&self) -> Result<(), MetaError> {
        self.inner.init().await
    }

    async fn get_record(
        &self,
        scope: &MetaScope,
        table: MetaTable,
        filter: &Record,
    ) -> Result<Option<Record>, MetaError> {
        self.inner.get_record(scope, table, filter).await
    }

    async fn insert_record(
        &self,
        scope: &MetaScope,
        table: MetaTable,
        record: Record,
    ) -> Result<(), MetaError> {
        self.inner.insert_record(scope, table, record).await
    }

    async fn update_record(
        &self,
        scope: &MetaScope,
        table: MetaTable,
        patch: Record,
        filter: &Record,
    ) -> Result<u64, MetaError> {
        self.inner.update_record(scope, table, patch, filter).await
    }

    async fn list_projects(&self) -> Result<Vec<Project>, MetaError> {
        self.inner.list_projects().await
    }

    async fn get_project_by_id(&self, id: &str) -> Result<Option<Project>, MetaError> {
        self.inner.get_project_by_id(id).await
    }

    async fn set_active_config(&self, config: Arc<PlatformConfig>) -> Result<(), MetaError> {
        Err(MetaError::Rejected(format!(
            "connection for env '{}' refused",
            config.working_env
        )))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub meta: Arc<InMemoryMetaStore>,
    pub migrations: Arc<RecordingMigrations>,
    pub upgrader: Arc<CountingUpgrader>,
    pub server: ServerConfig,
    pub dir: TempDir,
}

pub struct HarnessOptions {
    pub variant: Variant,
    pub factory: Option<Arc<dyn BuilderFactory>>,
    pub migrations: RecordingMigrations,
    pub configure: Box<dyn FnOnce(&mut PlatformConfig)>,
    /// Serve through [`PinnedConfigMeta`], so every env switch is refused.
    pub pin_config: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            variant: Variant::Community,
            factory: None,
            migrations: RecordingMigrations::default(),
            configure: Box::new(|_| {}),
            pin_config: false,
        }
    }
}

/// A community harness seeded with `projects`, not yet booted.
pub async fn harness(projects: &[Project]) -> Harness {
    harness_with(projects, HarnessOptions::default()).await
}

pub async fn harness_with(projects: &[Project], options: HarnessOptions) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let server = ServerConfig {
        ee: options.variant == Variant::Enterprise,
        ..server_config(dir.path())
    };
    let mut platform = platform_config(&server);
    (options.configure)(&mut platform);

    let meta = Arc::new(InMemoryMetaStore::new());
    for project in projects {
        meta.seed_project(project).await.unwrap();
    }
    let migrations = Arc::new(options.migrations);
    let upgrader = Arc::new(CountingUpgrader::default());

    let mut components = Components::for_variant(options.variant);
    if let Some(factory) = options.factory {
        components = components.with_builder_factory(factory);
    }

    let store: Arc<dyn MetaStore> = if options.pin_config {
        Arc::new(PinnedConfigMeta {
            inner: Arc::clone(&meta),
        })
    } else {
        meta.clone()
    };
    let orchestrator = Orchestrator::new(
        server.clone(),
        platform,
        OrchestratorParts {
            meta: store,
            migrations: migrations.clone(),
            upgrader: upgrader.clone(),
            components,
        },
    );

    Harness {
        orchestrator,
        meta,
        migrations,
        upgrader,
        server,
        dir,
    }
}

impl Harness {
    pub async fn boot(&self) -> Router {
        self.orchestrator.init(InitOptions::default()).await.unwrap()
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn get_with_header(app: Router, uri: &str, name: &str, value: &str) -> Response<Body> {
    app.oneshot(
        Request::get(uri)
            .header(name, value)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response<Body> {
    app.oneshot(
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn post_raw(app: Router, uri: &str, body: &'static str) -> Response<Body> {
    app.oneshot(
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// POST a JSON-looking body with no `content-type` header.
pub async fn post_untyped(app: Router, uri: &str, body: Value) -> Response<Body> {
    app.oneshot(
        Request::post(uri)
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}
