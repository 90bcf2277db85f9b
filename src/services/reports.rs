//! Read models for the historical and system status views.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::models::{
    MeasurementRecord, PeriodType, Station, StatusMarker, MARKER_LAST_AGGREGATES_CALCULATION,
    MARKER_LAST_API_SUCCESS, MARKER_LAST_TOKEN_REFRESH,
};
use crate::db::Store;
use crate::errors::AppError;
use crate::services::token::{TokenManager, TokenStatus};

/// Monthly and yearly totals of one station, newest first.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StationHistory {
    pub station: Station,
    pub months: Vec<MeasurementRecord>,
    pub years: Vec<MeasurementRecord>,
}

/// Station id → history. Serialises as a JSON object keyed by id.
pub type HistoricalRainfall = BTreeMap<i64, StationHistory>;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SystemStatus {
    pub token: TokenStatus,
    pub last_token_refresh: Option<StatusMarker>,
    pub last_aggregates_calculation: Option<StatusMarker>,
    pub last_api_success: Option<StatusMarker>,
    pub server_time: DateTime<Utc>,
}

/// Everything the admin panel shows.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AdminStatus {
    pub token: TokenStatus,
    pub system: Vec<StatusMarker>,
    pub stations: usize,
    /// Stored record count per period type
    pub records: BTreeMap<String, u64>,
}

#[derive(Clone)]
pub struct Reports {
    store: Arc<dyn Store>,
    tokens: TokenManager,
}

impl Reports {
    pub fn new(store: Arc<dyn Store>, tokens: TokenManager) -> Self {
        Self { store, tokens }
    }

    pub async fn get_historical(&self) -> Result<HistoricalRainfall, AppError> {
        let mut history = BTreeMap::new();
        for station in self.store.list_stations().await? {
            let months = self
                .store
                .query_records(station.id, PeriodType::Month, None)
                .await?;
            let years = self
                .store
                .query_records(station.id, PeriodType::Year, None)
                .await?;
            history.insert(
                station.id,
                StationHistory {
                    station,
                    months,
                    years,
                },
            );
        }
        Ok(history)
    }

    pub async fn get_system_status(&self) -> Result<SystemStatus, AppError> {
        let mut markers: BTreeMap<String, StatusMarker> = self
            .store
            .list_status_markers()
            .await?
            .into_iter()
            .map(|m| (m.key.clone(), m))
            .collect();

        Ok(SystemStatus {
            token: self.tokens.status().await,
            last_token_refresh: markers.remove(MARKER_LAST_TOKEN_REFRESH),
            last_aggregates_calculation: markers.remove(MARKER_LAST_AGGREGATES_CALCULATION),
            last_api_success: markers.remove(MARKER_LAST_API_SUCCESS),
            server_time: Utc::now(),
        })
    }

    pub async fn get_admin_status(&self) -> Result<AdminStatus, AppError> {
        let mut records = BTreeMap::new();
        for period in [
            PeriodType::ThirtyMinutes,
            PeriodType::OneHour,
            PeriodType::ThreeHours,
            PeriodType::Day,
            PeriodType::Month,
            PeriodType::Year,
        ] {
            records.insert(
                period.as_str().to_string(),
                self.store.count_records(period).await?,
            );
        }

        Ok(AdminStatus {
            token: self.tokens.status().await,
            system: self.store.list_status_markers().await?,
            stations: self.store.list_stations().await?.len(),
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::services::mock::{rain_gauge, ScriptedProvider};

    async fn reports() -> (Reports, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let tokens = TokenManager::new(store.clone(), Arc::new(ScriptedProvider::new()), None);
        (Reports::new(store.clone(), tokens), store)
    }

    #[tokio::test]
    async fn test_historical_groups_by_station_newest_first() {
        let (reports, store) = reports().await;
        let station = store
            .register_station(&rain_gauge("05:00:00:00:00:01"))
            .await
            .unwrap();
        for (period, key, mm) in [
            (PeriodType::Month, "2024-05", 10.0),
            (PeriodType::Month, "2024-06", 8.2),
            (PeriodType::Year, "2024", 18.2),
            (PeriodType::Day, "2024-06-01", 3.0),
        ] {
            store.upsert_record(station.id, period, key, mm).await.unwrap();
        }

        let history = reports.get_historical().await.unwrap();

        let entry = &history[&station.id];
        let months: Vec<&str> = entry.months.iter().map(|r| r.period_value.as_str()).collect();
        assert_eq!(months, vec!["2024-06", "2024-05"]);
        assert_eq!(entry.years.len(), 1);

        let json = serde_json::to_value(&history).unwrap();
        assert!(json.get(station.id.to_string()).is_some());
    }

    #[tokio::test]
    async fn test_system_status_picks_known_markers() {
        let (reports, store) = reports().await;
        store
            .set_status_marker(MARKER_LAST_API_SUCCESS, "2024-06-03T10:00:00.000Z")
            .await
            .unwrap();

        let status = reports.get_system_status().await.unwrap();

        assert!(!status.token.initialized);
        assert_eq!(
            status.last_api_success.map(|m| m.value).as_deref(),
            Some("2024-06-03T10:00:00.000Z")
        );
        assert!(status.last_token_refresh.is_none());
    }

    #[tokio::test]
    async fn test_admin_status_counts_records() {
        let (reports, store) = reports().await;
        store.upsert_record(1, PeriodType::Day, "2024-06-01", 1.0).await.unwrap();
        store.upsert_record(1, PeriodType::Day, "2024-06-02", 0.0).await.unwrap();

        let status = reports.get_admin_status().await.unwrap();

        assert_eq!(status.records["day"], 2);
        assert_eq!(status.records["month"], 0);
    }
}
