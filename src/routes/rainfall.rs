//! Rainfall endpoints.
//!
//! - GET  /api/rainfall/current/:station_id
//! - GET  /api/rainfall/historical
//! - POST /api/rainfall/update-cache

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::db::models::PeriodType;
use crate::errors::{AppError, ErrorResponse};
use crate::routes::{AppState, MessageResponse};
use crate::services::fetcher::CurrentRainfall;
use crate::services::reports::{HistoricalRainfall, StationHistory};

/// Totals measured by a client directly against Netatmo.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCacheRequest {
    #[serde(alias = "stationId")]
    pub station_id: i64,
    /// Period label (`30min`, `1hour`, `3hours`) → millimetres
    pub periods: BTreeMap<String, f64>,
}

/// Current rainfall of one station, live where possible.
///
/// Each period falls back to the newest cached value when its live fetch
/// fails. Never fails because the provider is down.
#[utoipa::path(
    get,
    path = "/api/rainfall/current/{station_id}",
    tag = "Rainfall",
    params(
        ("station_id" = i64, Path, description = "Station id"),
    ),
    responses(
        (status = 200, description = "Per-period rainfall with sources", body = CurrentRainfall),
        (status = 404, description = "Station not found", body = ErrorResponse),
    )
)]
pub async fn get_current(
    State(state): State<AppState>,
    Path(station_id): Path<i64>,
) -> Result<Json<CurrentRainfall>, AppError> {
    Ok(Json(state.fetcher.fetch_current(station_id).await?))
}

/// Monthly and yearly totals of every station, keyed by station id.
#[utoipa::path(
    get,
    path = "/api/rainfall/historical",
    tag = "Rainfall",
    responses(
        (status = 200, description = "Station id → {station, months, years}", body = BTreeMap<String, StationHistory>),
    )
)]
pub async fn get_historical(
    State(state): State<AppState>,
) -> Result<Json<HistoricalRainfall>, AppError> {
    Ok(Json(state.reports.get_historical().await?))
}

/// Store short-period totals a client fetched itself.
#[utoipa::path(
    post,
    path = "/api/rainfall/update-cache",
    tag = "Rainfall",
    request_body = UpdateCacheRequest,
    responses(
        (status = 200, description = "Cache updated", body = MessageResponse),
        (status = 400, description = "Unknown or non sub-day period", body = ErrorResponse),
        (status = 404, description = "Station not found", body = ErrorResponse),
    )
)]
pub async fn update_cache(
    State(state): State<AppState>,
    Json(body): Json<UpdateCacheRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let values = parse_periods(&body.periods)?;
    let written = state
        .fetcher
        .record_client_values(body.station_id, &values)
        .await?;
    Ok(Json(MessageResponse {
        message: format!("Cache updated ({} periods)", written),
    }))
}

fn parse_periods(periods: &BTreeMap<String, f64>) -> Result<Vec<(PeriodType, f64)>, AppError> {
    if periods.is_empty() {
        return Err(AppError::BadRequest("periods must not be empty".to_string()));
    }
    periods
        .iter()
        .map(|(label, mm)| {
            label
                .parse::<PeriodType>()
                .map(|period| (period, *mm))
                .map_err(|e| AppError::BadRequest(e.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::test_state;
    use crate::services::fetcher::Source;
    use crate::services::mock::rain_gauge;
    use crate::db::Store;

    #[test]
    fn test_parse_periods_rejects_unknown_labels() {
        let mut periods = BTreeMap::new();
        periods.insert("1hour".to_string(), 1.0);
        assert_eq!(parse_periods(&periods).unwrap(), vec![(PeriodType::OneHour, 1.0)]);

        periods.insert("2hours".to_string(), 1.0);
        assert!(matches!(parse_periods(&periods), Err(AppError::BadRequest(_))));
        assert!(matches!(parse_periods(&BTreeMap::new()), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_update_cache_accepts_camel_case_station_id() {
        let body: UpdateCacheRequest =
            serde_json::from_str(r#"{"stationId": 3, "periods": {"30min": 0.4}}"#).unwrap();
        assert_eq!(body.station_id, 3);
        assert_eq!(body.periods["30min"], 0.4);
    }

    #[tokio::test]
    async fn test_current_for_unknown_station_is_not_found() {
        let (state, _, _) = test_state().await;
        let result = get_current(State(state), Path(7)).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_current_with_provider_down_still_answers() {
        let (state, store, provider) = test_state().await;
        let station = store
            .register_station(&rain_gauge("05:00:00:00:00:01"))
            .await
            .unwrap();
        store
            .upsert_record(station.id, PeriodType::OneHour, "2024-06-03T10:00:00.000Z", 0.8)
            .await
            .unwrap();
        provider.set_fail_measurements(true);

        let Json(current) = get_current(State(state), Path(station.id)).await.unwrap();

        assert_eq!(current.source, Source::Cache);
        assert!(!current.fresh);
        assert_eq!(current.reading("1hour").unwrap().amount_mm, 0.8);
    }

    #[tokio::test]
    async fn test_update_cache_writes_records() {
        let (state, store, _) = test_state().await;
        let station = store
            .register_station(&rain_gauge("05:00:00:00:00:01"))
            .await
            .unwrap();
        let mut periods = BTreeMap::new();
        periods.insert("30min".to_string(), 0.2);
        periods.insert("3hours".to_string(), 1.2);

        let Json(ack) = update_cache(
            State(state),
            Json(UpdateCacheRequest {
                station_id: station.id,
                periods,
            }),
        )
        .await
        .unwrap();

        assert_eq!(ack.message, "Cache updated (2 periods)");
        let latest = store
            .latest_record(station.id, PeriodType::ThreeHours)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.amount_mm, 1.2);
    }
}
