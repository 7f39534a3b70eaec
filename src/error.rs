use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-specific errors
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Model not found: {0}")]
    RouteNotFound(String),

    #[error("Upstream returned {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Transformation error: {0}")]
    Transform(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, error_type, error_message) = match self {
            ProxyError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error", msg)
            }
            ProxyError::RouteNotFound(model) => (
                StatusCode::NOT_FOUND,
                "invalid_request_error",
                format!("Model not found: {}", model),
            ),
            ProxyError::Serialization(err) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                format!("JSON error: {}", err),
            ),
            ProxyError::Transform(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error", msg)
            }
            ProxyError::UpstreamStatus { status, body } => (
                StatusCode::BAD_GATEWAY,
                "proxy_error",
                format!("Upstream returned {}: {}", status, body),
            ),
            ProxyError::Upstream(msg) => (
                StatusCode::BAD_GATEWAY,
                "proxy_error",
                format!("Failed to forward request: {}", msg),
            ),
            ProxyError::Http(err) => (
                StatusCode::BAD_GATEWAY,
                "proxy_error",
                format!("Failed to forward request: {}", err),
            ),
            ProxyError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "proxy_error",
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "type": error_type,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for proxy operations
pub type ProxyResult<T> = Result<T, ProxyError>;
