//! Error reporting and the status transport.
//!
//! Both are best-effort: failing to set either up is logged and boot goes
//! on without it.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use switchyard_events::{EventBus, PlatformEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Invalid error-report DSN '{0}'")]
    InvalidDsn(String),

    #[error("Failed to build error-report client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Failed to bind status transport on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// ErrorReporter
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Sink {
    endpoint: reqwest::Url,
    client: reqwest::Client,
}

/// Posts error reports to the configured DSN in the background. A reporter
/// without a DSN does nothing.
#[derive(Debug, Clone, Default)]
pub struct ErrorReporter {
    sink: Option<Arc<Sink>>,
}

impl ErrorReporter {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn init(dsn: Option<&str>) -> Result<Self, TelemetryError> {
        let Some(dsn) = dsn else {
            return Ok(Self::disabled());
        };
        let endpoint =
            reqwest::Url::parse(dsn).map_err(|_| TelemetryError::InvalidDsn(dsn.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        tracing::info!(host = endpoint.host_str().unwrap_or_default(), "Error reporting enabled");
        Ok(Self {
            sink: Some(Arc::new(Sink { endpoint, client })),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Send `error` without waiting; delivery failures are only logged.
    pub fn report(&self, context: &str, error: &dyn std::fmt::Display) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let body = json!({
            "level": "error",
            "context": context,
            "message": error.to_string(),
            "timestamp": Utc::now(),
            "release": env!("CARGO_PKG_VERSION"),
        });
        runtime.spawn(async move {
            let result = sink
                .client
                .post(sink.endpoint.clone())
                .json(&body)
                .send()
                .await
                .and_then(|r| r.error_for_status());
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to deliver error report");
            }
        });
    }
}

// ---------------------------------------------------------------------------
// StatusMonitor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    /// Platform events seen, by type.
    pub events: BTreeMap<String, u64>,
    pub last_event: Option<PlatformEvent>,
}

/// Counts platform events published on the bus.
pub struct StatusMonitor {
    started_at: DateTime<Utc>,
    events: Mutex<BTreeMap<String, u64>>,
    last_event: Mutex<Option<PlatformEvent>>,
}

impl StatusMonitor {
    /// Subscribe to `bus` and count events until `cancel` fires.
    pub fn start(bus: &EventBus, cancel: CancellationToken) -> Arc<Self> {
        let monitor = Arc::new(Self {
            started_at: Utc::now(),
            events: Mutex::new(BTreeMap::new()),
            last_event: Mutex::new(None),
        });

        let mut rx = bus.subscribe();
        let consumer = Arc::clone(&monitor);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) => consumer.record(event),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Status monitor lagged behind event bus");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!("Status monitor stopped");
        });

        monitor
    }

    fn record(&self, event: PlatformEvent) {
        *self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.event_type.clone())
            .or_insert(0) += 1;
        *self.last_event.lock().unwrap_or_else(PoisonError::into_inner) = Some(event);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            events: self
                .events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            last_event: self
                .last_event
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    pub fn count(&self, event_type: &str) -> u64 {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .copied()
            .unwrap_or(0)
    }
}

/// Serve `GET /status` on its own port until `cancel` fires.
///
/// Binding happens before this returns, so an unavailable port is reported
/// to the caller instead of failing in the background.
pub async fn serve_status(
    monitor: Arc<StatusMonitor>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, TelemetryError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| TelemetryError::Bind { addr, source })?;
    let app = crate::routes::status::router().with_state(monitor);
    tracing::info!(%addr, "Status transport listening");

    Ok(tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::warn!(error = %e, "Status transport stopped with error");
        }
    }))
}
