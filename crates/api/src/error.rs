use std::any::Any;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use switchyard_core::config::ConfigError;
use switchyard_core::error::CoreError;
use switchyard_db::MetaError;
use switchyard_events::{ChangeError, ListenerError};

use crate::builder::BuilderError;

/// Application-level error type for HTTP handlers.
///
/// Request-time errors are not classified further: every variant renders
/// as `400 {"msg": "<error message>"}`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Meta(#[from] MetaError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Change(#[from] ChangeError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Builder(#[from] BuilderError),

    /// The request body was not accepted by the `Json` extractor.
    #[error(transparent)]
    Json(#[from] JsonRejection),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

/// The `{"msg": ...}` error body.
pub fn error_body(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, axum::Json(json!({ "msg": msg.into() }))).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if matches!(self, AppError::Internal(_) | AppError::Meta(MetaError::Database(_))) {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }
        error_body(StatusCode::BAD_REQUEST, self.to_string())
    }
}

/// Translate a panic inside the request chain into the same 400 shape.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let msg = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "Unknown error".to_string()
    };
    tracing::error!(error = %msg, "Request handler panicked");
    error_body(StatusCode::BAD_REQUEST, msg)
}
