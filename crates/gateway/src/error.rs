//! Gateway error types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Gateway error type.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Request body is not valid JSON or not an event batch.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Request is well-formed JSON but missing required data.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Resource Manager or rule store failure.
    #[error("External service error: {0}")]
    External(#[from] external_services::Error),

    /// Anyhow error (for compatibility with the collaborator traits).
    #[error("Error: {0}")]
    Anyhow(#[from] anyhow::Error),

    /// Subscriber channel is full or closed.
    #[error("Channel send error")]
    ChannelSend,
}

impl GatewayError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Json(_) | GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tokio::sync::mpsc::error::TrySendError<axum::extract::ws::Message>> for GatewayError {
    fn from(_: tokio::sync::mpsc::error::TrySendError<axum::extract::ws::Message>) -> Self {
        GatewayError::ChannelSend
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            GatewayError::External(e) => json!({
                "error": "Failed to fetch resources",
                "details": e.to_string(),
            }),
            other => json!({ "error": other.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
