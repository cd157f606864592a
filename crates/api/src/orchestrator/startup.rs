//! The boot sequence.
//!
//! Steps run strictly in order. Tool directory, error reporting, the status
//! transport and per-connection migrations are best-effort; from metadata
//! store init onward any failure aborts boot.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use futures::future::BoxFuture;
use serde_json::json;
use switchyard_db::{MetaError, MetaStore};
use switchyard_events::bus::names;
use switchyard_events::PlatformEvent;

use super::migrations;
use super::secret;
use super::Orchestrator;
use crate::auth::controller::AuthError;
use crate::builder::BuilderError;
use crate::route_table::RouteTable;
use crate::telemetry::{serve_status, ErrorReporter, StatusMonitor};
use crate::upgrader::UpgradeError;

#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("Metadata store failed to initialize: {0}")]
    Meta(#[source] MetaError),

    #[error("Failed to bootstrap the signing secret: {0}")]
    Secret(#[source] MetaError),

    #[error("Metadata upgrade failed: {0}")]
    Upgrade(#[from] UpgradeError),

    #[error("Post-migration hook failed: {0}")]
    Hook(anyhow::Error),

    #[error("Auth controller failed to initialize: {0}")]
    Auth(#[from] AuthError),

    #[error("Failed to list projects: {0}")]
    Projects(#[source] MetaError),

    #[error("Project builder failed to initialize: {0}")]
    Builder(#[from] BuilderError),
}

/// Runs after migrations and upgrades, before anything is mounted.
pub type PostMigrationHook =
    Box<dyn FnOnce(Arc<dyn MetaStore>) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

#[derive(Default)]
pub struct InitOptions {
    pub post_migration: Option<PostMigrationHook>,
}

impl InitOptions {
    pub fn with_post_migration<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce(Arc<dyn MetaStore>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.post_migration = Some(Box::new(
            move |meta: Arc<dyn MetaStore>| -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(hook(meta))
            },
        ));
        self
    }
}

impl Orchestrator {
    pub(super) async fn boot_sequence(
        self: &Arc<Self>,
        options: InitOptions,
    ) -> Result<Router, BootError> {
        let config = self.config();
        let env = self.env();
        tracing::info!(env = %env, variant = ?self.components.variant, "Booting");

        // 1. Tool directory.
        let tool_dir = config.tool_dir();
        if let Err(e) = tokio::fs::create_dir_all(&tool_dir).await {
            tracing::warn!(path = %tool_dir.display(), error = %e, "Failed to create tool directory");
        }

        // 2. Error reporting.
        let reporter = ErrorReporter::init(self.server.sentry_dsn.as_deref()).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Error reporting disabled");
            ErrorReporter::disabled()
        });
        let _ = self.reporter.set(reporter.clone());

        // 3. Status transport.
        self.start_status_transport().await;

        // 4. Migrations.
        if config.trial {
            tracing::info!("Trial mode, skipping migrations");
        } else {
            if let Some(conn) = &config.meta.db {
                if let Err(e) = migrations::ensure_meta_database(self.migrations.as_ref(), conn).await
                {
                    tracing::error!(error = %e, "Failed to ensure metadata database");
                    reporter.report("meta-database", &e);
                }
            }
            migrations::run_all(self.migrations.as_ref(), &config, &env, &reporter).await;
        }

        // 5. Metadata store.
        self.meta.init().await.map_err(BootError::Meta)?;
        tracing::info!("Metadata store initialized");

        // 6. Signing secret.
        self.bootstrap_secret().await?;

        // 7. One-time upgrades.
        let report = self.upgrader.upgrade(self.meta.as_ref()).await?;
        tracing::info!(from = ?report.from, to = %report.to, applied = report.applied.len(), "Metadata upgrades complete");

        // 8. Caller hook.
        if let Some(hook) = options.post_migration {
            hook(Arc::clone(&self.meta)).await.map_err(BootError::Hook)?;
        }

        // 9-10. Auth, then project builders.
        self.init_project_builders().await?;

        // 11. One listener for both producers.
        self.meta_manager.set_listener(self.listener.clone());
        match self.take_stream() {
            Some(stream) => {
                self.spawn_dispatcher(stream);
            }
            None => tracing::warn!("Runtime change dispatcher already running"),
        }

        // 12. Frame with dashboard, behind the swappable root.
        let table = RouteTable::new(self.frame(&self.config()));
        let root = table.root_router();
        let _ = self.route_table.set(table);

        let projects = self.registry.len().await;
        self.bus.publish(
            PlatformEvent::new(names::APP_STARTED).with_payload(json!({
                "env": env,
                "variant": self.components.variant,
                "projects": projects,
            })),
        );
        tracing::info!(dashboard = %self.dashboard_url(), "Boot complete");
        Ok(root)
    }

    async fn start_status_transport(&self) {
        let monitor = StatusMonitor::start(&self.bus, self.cancel.child_token());
        let _ = self.monitor.set(Arc::clone(&monitor));

        let Some(port) = self.server.status_port else {
            return;
        };
        let host: IpAddr = self.server.host.parse().unwrap_or_else(|_| {
            tracing::warn!(host = %self.server.host, "Unparseable HOST, status transport binds 0.0.0.0");
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        });
        let addr = SocketAddr::new(host, port);
        if let Err(e) = serve_status(monitor, addr, self.cancel.child_token()).await {
            tracing::warn!(error = %e, "Status transport unavailable");
        }
    }

    async fn bootstrap_secret(&self) -> Result<(), BootError> {
        self.secret
            .get_or_try_init(|| async {
                let mut next = (*self.config()).clone();
                let secret = secret::bootstrap(self.meta.as_ref(), &mut next)
                    .await
                    .map_err(BootError::Secret)?;
                self.active.replace(Arc::new(next));
                Ok::<_, BootError>(secret)
            })
            .await?;
        Ok(())
    }

    /// Auth first, then one builder per project in listing order. Only
    /// projects whose status auto-starts are initialized, one at a time.
    pub(super) async fn init_project_builders(&self) -> Result<(), BootError> {
        let config = self.config();
        self.components
            .auth
            .init(Arc::clone(&self.meta), Arc::clone(&config))
            .await?;

        let dropped = self.registry.clear().await;
        if dropped > 0 {
            tracing::debug!(dropped, "Cleared previous project builders");
        }

        let projects = self.meta.list_projects().await.map_err(BootError::Projects)?;
        let mut to_start = Vec::new();
        for project in projects {
            let auto_start = project.status.is_auto_start();
            let builder = self
                .components
                .builder_factory
                .create(project, self.builder_context());
            if !self.registry.push(Arc::clone(&builder)).await {
                tracing::warn!(project_id = %builder.id(), "Duplicate project in listing, skipped");
                continue;
            }
            if auto_start {
                to_start.push(builder);
            }
        }

        for builder in &to_start {
            builder.init(false).await?;
        }
        let registered = self.registry.len().await;
        tracing::info!(
            registered,
            started = to_start.len(),
            "Project builders initialized"
        );
        Ok(())
    }
}
