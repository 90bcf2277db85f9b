use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Standard error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
}

/// Every failure the service can produce.
///
/// `Clone` so that all callers attached to one in-flight token refresh
/// observe the very same error value.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The provider rejected our credentials or the refresh token.
    #[error("Authentication error: {0}")]
    AuthError(String),

    /// Network failure, timeout, or non-2xx answer from the provider.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider reported the access token as expired (HTTP 401).
    #[error("Access token expired")]
    TokenExpired,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Database error: {0}")]
    DatabaseError(Arc<sqlx::Error>),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(Arc::new(err))
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::InternalError(format!("Migration failed: {}", err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Unauthorized(msg) => {
                let body = axum::Json(ErrorResponse { error: msg.clone() });
                return (
                    StatusCode::UNAUTHORIZED,
                    [("WWW-Authenticate", "Basic realm=\"Admin Panel\"")],
                    body,
                )
                    .into_response();
            }
            AppError::AuthError(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::ProviderUnavailable(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::TokenExpired => (
                StatusCode::BAD_GATEWAY,
                "Provider access token expired".to_string(),
            ),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::DatabaseError(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal database error".to_string(),
                )
            }
        };

        (status, axum::Json(ErrorResponse { error: message })).into_response()
    }
}
