//! System status endpoints.
//!
//! - GET /api/system/status: token status and last-activity markers
//! - GET /api/system/scheduler: background job state

use axum::extract::State;
use axum::Json;

use crate::errors::{AppError, ErrorResponse};
use crate::routes::AppState;
use crate::services::reports::SystemStatus;
use crate::services::scheduler::{SchedulerState, SharedSchedulerState};

/// Token status, last refresh/aggregation/API success markers and server time.
#[utoipa::path(
    get,
    path = "/api/system/status",
    tag = "System",
    responses(
        (status = 200, description = "System status", body = SystemStatus),
        (status = 500, description = "Database error", body = ErrorResponse),
    )
)]
pub async fn get_system_status(State(state): State<AppState>) -> Result<Json<SystemStatus>, AppError> {
    Ok(Json(state.reports.get_system_status().await?))
}

/// Get the current scheduler status.
///
/// Per job: next_run_at, last start/finish, last result, run and failure counts.
#[utoipa::path(
    get,
    path = "/api/system/scheduler",
    tag = "System",
    responses(
        (status = 200, description = "Current scheduler status", body = SchedulerState),
    )
)]
pub async fn get_scheduler_status(State(state): State<SharedSchedulerState>) -> Json<SchedulerState> {
    let s = state.read().await;
    Json(s.clone())
}
