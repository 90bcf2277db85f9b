//! Admin endpoints behind HTTP Basic auth.
//!
//! - GET  /admin/status
//! - POST /admin/tokens

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::errors::{AppError, ErrorResponse};
use crate::routes::{AppState, MessageResponse};
use crate::services::reports::AdminStatus;

#[derive(Clone)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateTokensRequest {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
}

/// Reject requests without valid Basic credentials.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    check_basic_auth(header, &state.admin)?;
    Ok(next.run(request).await)
}

fn check_basic_auth(header: Option<&str>, expected: &AdminCredentials) -> Result<(), AppError> {
    let encoded = header
        .and_then(|h| h.strip_prefix("Basic "))
        .ok_or_else(|| AppError::Unauthorized("Authentication required".to_string()))?;
    let decoded = STANDARD
        .decode(encoded.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| AppError::Unauthorized("Invalid credentials".to_string()))?;
    let (username, password) = decoded.split_once(':').unwrap_or((decoded.as_str(), ""));

    if username == expected.username && password == expected.password {
        Ok(())
    } else {
        tracing::warn!("Admin login rejected for user '{}'", username);
        Err(AppError::Unauthorized("Invalid credentials".to_string()))
    }
}

/// Token status, every status marker and stored record counts.
#[utoipa::path(
    get,
    path = "/admin/status",
    tag = "Admin",
    responses(
        (status = 200, description = "Admin status", body = AdminStatus),
        (status = 401, description = "Missing or invalid credentials", body = ErrorResponse),
    )
)]
pub async fn get_admin_status(State(state): State<AppState>) -> Result<Json<AdminStatus>, AppError> {
    Ok(Json(state.reports.get_admin_status().await?))
}

/// Replace the token pair by hand.
///
/// The access token is tried against Netatmo first; tokens that fail that
/// call are rejected without touching the stored pair.
#[utoipa::path(
    post,
    path = "/admin/tokens",
    tag = "Admin",
    request_body = UpdateTokensRequest,
    responses(
        (status = 200, description = "Tokens updated", body = MessageResponse),
        (status = 400, description = "Missing or invalid tokens", body = ErrorResponse),
        (status = 401, description = "Missing or invalid credentials", body = ErrorResponse),
    )
)]
pub async fn update_tokens(
    State(state): State<AppState>,
    Json(body): Json<UpdateTokensRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let access_token = body.access_token.trim();
    let refresh_token = body.refresh_token.trim();
    if access_token.is_empty() || refresh_token.is_empty() {
        return Err(AppError::BadRequest(
            "access_token and refresh_token are required".to_string(),
        ));
    }

    if let Err(e) = state.provider.list_stations(access_token).await {
        tracing::warn!("Submitted tokens failed the API test: {}", e);
        return Err(AppError::BadRequest(
            "Invalid tokens - API test failed".to_string(),
        ));
    }

    state.tokens.update_tokens(access_token, refresh_token).await?;
    Ok(Json(MessageResponse {
        message: "Tokens updated successfully".to_string(),
    }))
}
