use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for proxy operations
pub type Result<T> = std::result::Result<T, SpProxyError>;

/// Proxy error types
#[derive(Error, Debug)]
pub enum SpProxyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid site URL: {0}")]
    InvalidSiteUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to resolve auth context: {0}")]
    AuthResolve(String),

    #[error("Unsupported auth strategy: {0}")]
    UnsupportedStrategy(String),

    #[error("Missing authentication credentials")]
    MissingCredentials,

    #[error("Auth context missing for request to {0}")]
    MissingAuthContext(String),

    #[error("Auth result has no Authorization header")]
    MissingAuthorization,

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl SpProxyError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            SpProxyError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SpProxyError::InvalidSiteUrl(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SpProxyError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SpProxyError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SpProxyError::AuthResolve(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SpProxyError::UnsupportedStrategy(_) => StatusCode::UNAUTHORIZED,
            SpProxyError::MissingCredentials => StatusCode::UNAUTHORIZED,
            SpProxyError::MissingAuthContext(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SpProxyError::MissingAuthorization => StatusCode::UNAUTHORIZED,
            SpProxyError::InvalidHeader(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SpProxyError::Proxy(_) => StatusCode::BAD_GATEWAY,
            SpProxyError::Backend(_) => StatusCode::BAD_GATEWAY,
            SpProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            SpProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SpProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
