//! JSON body parsing with a size cap.
//!
//! JSON request bodies are buffered once (up to the configured cap) and
//! parsed into a [`JsonBody`] extension so later middleware can read fields
//! such as `project_id`. The buffered bytes are put back for the handler.

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;

/// The parsed JSON request body.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonBody(pub serde_json::Value);

fn is_json(req: &Request) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| {
            let mime = mime.trim();
            mime == "application/json" || mime.ends_with("+json")
        })
}

pub async fn parse_json(State(limit): State<usize>, req: Request, next: Next) -> Response {
    if !is_json(&req) {
        return next.run(req).await;
    }

    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return AppError::BadRequest(format!("Request body rejected: {e}")).into_response()
        }
    };

    let mut req = Request::from_parts(parts, Body::from(bytes.clone()));
    if !bytes.is_empty() {
        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                req.extensions_mut().insert(JsonBody(value));
            }
            Err(e) => {
                return AppError::BadRequest(format!("Malformed JSON body: {e}")).into_response()
            }
        }
    }
    next.run(req).await
}
