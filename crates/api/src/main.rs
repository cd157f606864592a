use std::net::{IpAddr, SocketAddr};

use anyhow::Context;
use switchyard_api::config::ServerConfig;
use switchyard_api::{config_factory, InitOptions, Orchestrator, OrchestratorParts};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchyard_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let server = ServerConfig::from_env().context("Invalid server configuration")?;
    let platform =
        config_factory::make(&server).context("Failed to build platform configuration")?;
    tracing::info!(env = %platform.working_env, trial = platform.trial, "Platform configuration loaded");

    let parts = OrchestratorParts::production(&server, &platform)
        .context("Failed to set up metadata store")?;
    let orchestrator = Orchestrator::new(server.clone(), platform, parts);
    let app = orchestrator
        .init(InitOptions::default())
        .await
        .context("Boot failed")?;

    let host: IpAddr = server.host.parse().context("Invalid HOST")?;
    let addr = SocketAddr::new(host, server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Starting server on {addr}, dashboard at {}", orchestrator.dashboard_url());

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    orchestrator.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
