//! Station endpoints.
//!
//! - GET  /api/stations
//! - POST /api/stations/refresh

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::models::Station;
use crate::errors::{AppError, ErrorResponse};
use crate::routes::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct StationsRefreshResponse {
    pub message: String,
    pub stations: Vec<Station>,
}

/// List registered stations, discovering them from Netatmo on first use.
#[utoipa::path(
    get,
    path = "/api/stations",
    tag = "Stations",
    responses(
        (status = 200, description = "Registered rain gauges", body = Vec<Station>),
        (status = 502, description = "Discovery failed", body = ErrorResponse),
    )
)]
pub async fn list_stations(State(state): State<AppState>) -> Result<Json<Vec<Station>>, AppError> {
    Ok(Json(state.stations.list_or_discover().await?))
}

/// Re-discover rain gauges from Netatmo and register new ones.
#[utoipa::path(
    post,
    path = "/api/stations/refresh",
    tag = "Stations",
    responses(
        (status = 200, description = "Stations after discovery", body = StationsRefreshResponse),
        (status = 502, description = "Discovery failed", body = ErrorResponse),
    )
)]
pub async fn refresh_stations(
    State(state): State<AppState>,
) -> Result<Json<StationsRefreshResponse>, AppError> {
    let stations = state.stations.refresh().await?;
    Ok(Json(StationsRefreshResponse {
        message: format!("Updated {} stations", stations.len()),
        stations,
    }))
}
