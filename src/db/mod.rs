//! Persistence capability.
//!
//! [`Store`] is the seam between the core services and durable storage.
//! [`queries::PgStore`] is the PostgreSQL implementation used in production;
//! [`memory::MemoryStore`] keeps everything in process and backs the tests.
//!
//! Implementations must give read-your-writes consistency and must enforce
//! uniqueness of `(station_id, period_type, period_value)`, of station
//! `(device_id, module_id)`, of marker keys, and of the single token row.

use async_trait::async_trait;

use crate::errors::AppError;

pub mod memory;
pub mod models;
pub mod queries;

use models::{MeasurementRecord, NewStation, PeriodType, Station, StatusMarker, TokenState};

#[async_trait]
pub trait Store: Send + Sync {
    /// Cheap connectivity check for the health endpoint.
    async fn ping(&self) -> Result<(), AppError>;

    // --- Token state ---

    async fn get_token_state(&self) -> Result<Option<TokenState>, AppError>;

    /// Replace the singleton token row.
    async fn save_token_state(&self, tokens: &TokenState) -> Result<(), AppError>;

    // --- Stations ---

    /// All stations, ordered by name.
    async fn list_stations(&self) -> Result<Vec<Station>, AppError>;

    async fn get_station(&self, id: i64) -> Result<Option<Station>, AppError>;

    /// Register a station. A station already known by `(device_id, module_id)`
    /// is left untouched and returned as stored.
    async fn register_station(&self, station: &NewStation) -> Result<Station, AppError>;

    // --- Measurement records ---

    /// Insert or overwrite the record for `(station_id, period_type, period_value)`.
    async fn upsert_record(
        &self,
        station_id: i64,
        period_type: PeriodType,
        period_value: &str,
        amount_mm: f64,
    ) -> Result<(), AppError>;

    /// Records for a station and period type, newest `period_value` first,
    /// optionally narrowed to a single `period_value`.
    async fn query_records(
        &self,
        station_id: i64,
        period_type: PeriodType,
        period_value: Option<&str>,
    ) -> Result<Vec<MeasurementRecord>, AppError>;

    /// Records whose `period_value` starts with `prefix`, newest first.
    async fn query_records_with_prefix(
        &self,
        station_id: i64,
        period_type: PeriodType,
        prefix: &str,
    ) -> Result<Vec<MeasurementRecord>, AppError> {
        let all = self.query_records(station_id, period_type, None).await?;
        Ok(all
            .into_iter()
            .filter(|r| r.period_value.starts_with(prefix))
            .collect())
    }

    /// The record with the greatest `period_value` for this period type.
    async fn latest_record(
        &self,
        station_id: i64,
        period_type: PeriodType,
    ) -> Result<Option<MeasurementRecord>, AppError> {
        Ok(self
            .query_records(station_id, period_type, None)
            .await?
            .into_iter()
            .next())
    }

    async fn get_record(
        &self,
        station_id: i64,
        period_type: PeriodType,
        period_value: &str,
    ) -> Result<Option<MeasurementRecord>, AppError> {
        Ok(self
            .query_records(station_id, period_type, Some(period_value))
            .await?
            .into_iter()
            .next())
    }

    async fn count_records(&self, period_type: PeriodType) -> Result<u64, AppError>;

    // --- Status markers ---

    async fn set_status_marker(&self, key: &str, value: &str) -> Result<(), AppError>;

    async fn get_status_marker(&self, key: &str) -> Result<Option<StatusMarker>, AppError>;

    async fn list_status_markers(&self) -> Result<Vec<StatusMarker>, AppError>;
}
