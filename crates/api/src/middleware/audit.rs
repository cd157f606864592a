//! Request-audit logging.

use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::middleware::client_ip::ClientIp;
use crate::middleware::project_scope::ProjectScope;

/// One `switchyard::audit` line per request, after the response is ready.
pub async fn log_request(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let project_id = req
        .extensions()
        .get::<ProjectScope>()
        .and_then(|scope| scope.0.clone())
        .unwrap_or_default();
    let client_ip = req
        .extensions()
        .get::<ClientIp>()
        .and_then(|ClientIp(ip)| *ip)
        .map(|ip| ip.to_string())
        .unwrap_or_default();

    let response = next.run(req).await;

    tracing::info!(
        target: "switchyard::audit",
        %method,
        %path,
        %project_id,
        %client_ip,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "request",
    );
    response
}
