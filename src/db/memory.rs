//! In-process [`Store`] used by tests and local experiments.
//!
//! Enforces the same uniqueness rules as the PostgreSQL schema: records are
//! keyed by `(station_id, period_type, period_value)`, stations by
//! `(device_id, module_id)`, markers by key, and there is one token slot.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::models::{MeasurementRecord, NewStation, PeriodType, Station, StatusMarker, TokenState};
use super::Store;
use crate::errors::AppError;

type RecordKey = (i64, PeriodType, String);

#[derive(Debug, Default)]
struct Tables {
    tokens: Option<TokenState>,
    stations: Vec<Station>,
    records: BTreeMap<RecordKey, MeasurementRecord>,
    markers: BTreeMap<String, StatusMarker>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn get_token_state(&self) -> Result<Option<TokenState>, AppError> {
        Ok(self.tables.read().await.tokens.clone())
    }

    async fn save_token_state(&self, tokens: &TokenState) -> Result<(), AppError> {
        self.tables.write().await.tokens = Some(tokens.clone());
        Ok(())
    }

    async fn list_stations(&self) -> Result<Vec<Station>, AppError> {
        let mut stations = self.tables.read().await.stations.clone();
        stations.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(stations)
    }

    async fn get_station(&self, id: i64) -> Result<Option<Station>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables.stations.iter().find(|s| s.id == id).cloned())
    }

    async fn register_station(&self, station: &NewStation) -> Result<Station, AppError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables
            .stations
            .iter()
            .find(|s| s.device_id == station.device_id && s.module_id == station.module_id)
        {
            return Ok(existing.clone());
        }

        let stored = Station {
            id: tables.stations.len() as i64 + 1,
            device_id: station.device_id.clone(),
            module_id: station.module_id.clone(),
            name: station.name.clone(),
            location: station.location.clone(),
            created_at: Utc::now(),
        };
        tables.stations.push(stored.clone());
        Ok(stored)
    }

    async fn upsert_record(
        &self,
        station_id: i64,
        period_type: PeriodType,
        period_value: &str,
        amount_mm: f64,
    ) -> Result<(), AppError> {
        let record = MeasurementRecord {
            station_id,
            period_type,
            period_value: period_value.to_string(),
            amount_mm,
            created_at: Utc::now(),
        };
        self.tables
            .write()
            .await
            .records
            .insert((station_id, period_type, period_value.to_string()), record);
        Ok(())
    }

    async fn query_records(
        &self,
        station_id: i64,
        period_type: PeriodType,
        period_value: Option<&str>,
    ) -> Result<Vec<MeasurementRecord>, AppError> {
        let tables = self.tables.read().await;
        // BTreeMap order is ascending by key, so reverse for newest first.
        Ok(tables
            .records
            .values()
            .rev()
            .filter(|r| r.station_id == station_id && r.period_type == period_type)
            .filter(|r| period_value.map_or(true, |v| r.period_value == v))
            .cloned()
            .collect())
    }

    async fn count_records(&self, period_type: PeriodType) -> Result<u64, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .records
            .values()
            .filter(|r| r.period_type == period_type)
            .count() as u64)
    }

    async fn set_status_marker(&self, key: &str, value: &str) -> Result<(), AppError> {
        let marker = StatusMarker {
            key: key.to_string(),
            value: value.to_string(),
            updated_at: Utc::now(),
        };
        self.tables
            .write()
            .await
            .markers
            .insert(key.to_string(), marker);
        Ok(())
    }

    async fn get_status_marker(&self, key: &str) -> Result<Option<StatusMarker>, AppError> {
        Ok(self.tables.read().await.markers.get(key).cloned())
    }

    async fn list_status_markers(&self) -> Result<Vec<StatusMarker>, AppError> {
        Ok(self.tables.read().await.markers.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gauge(device: &str, module: &str, name: &str) -> NewStation {
        NewStation {
            device_id: device.to_string(),
            module_id: module.to_string(),
            name: name.to_string(),
            location: "Zurich".to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_same_key_keeps_one_record_with_later_value() {
        let store = MemoryStore::new();
        store
            .upsert_record(1, PeriodType::Day, "2024-06-01", 3.0)
            .await
            .unwrap();
        store
            .upsert_record(1, PeriodType::Day, "2024-06-01", 4.5)
            .await
            .unwrap();

        let records = store.query_records(1, PeriodType::Day, None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].amount_mm, 4.5);
    }

    #[tokio::test]
    async fn test_query_records_newest_first_and_filtered() {
        let store = MemoryStore::new();
        for (day, mm) in [("2024-06-01", 1.0), ("2024-06-03", 3.0), ("2024-06-02", 2.0)] {
            store.upsert_record(1, PeriodType::Day, day, mm).await.unwrap();
        }
        store.upsert_record(2, PeriodType::Day, "2024-06-04", 9.0).await.unwrap();
        store.upsert_record(1, PeriodType::Month, "2024-06", 6.0).await.unwrap();

        let days = store.query_records(1, PeriodType::Day, None).await.unwrap();
        let keys: Vec<&str> = days.iter().map(|r| r.period_value.as_str()).collect();
        assert_eq!(keys, vec!["2024-06-03", "2024-06-02", "2024-06-01"]);

        let one = store
            .query_records(1, PeriodType::Day, Some("2024-06-02"))
            .await
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].amount_mm, 2.0);

        let latest = store.latest_record(1, PeriodType::Day).await.unwrap().unwrap();
        assert_eq!(latest.period_value, "2024-06-03");
    }

    #[tokio::test]
    async fn test_prefix_query_matches_month() {
        let store = MemoryStore::new();
        store.upsert_record(1, PeriodType::Day, "2024-05-31", 7.0).await.unwrap();
        store.upsert_record(1, PeriodType::Day, "2024-06-01", 1.0).await.unwrap();
        store.upsert_record(1, PeriodType::Day, "2024-06-30", 2.0).await.unwrap();

        let june = store
            .query_records_with_prefix(1, PeriodType::Day, "2024-06")
            .await
            .unwrap();
        assert_eq!(june.len(), 2);
    }

    #[tokio::test]
    async fn test_register_station_is_idempotent() {
        let store = MemoryStore::new();
        let first = store.register_station(&gauge("70:ee", "05:aa", "Roof")).await.unwrap();
        let again = store
            .register_station(&gauge("70:ee", "05:aa", "Renamed"))
            .await
            .unwrap();
        assert_eq!(first, again, "Registered stations are immutable");

        let other = store.register_station(&gauge("70:ee", "05:bb", "Garden")).await.unwrap();
        assert_ne!(first.id, other.id);
        assert_eq!(store.list_stations().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_status_marker_overwrites() {
        let store = MemoryStore::new();
        store.set_status_marker("last_api_success", "a").await.unwrap();
        store.set_status_marker("last_api_success", "b").await.unwrap();
        let markers = store.list_status_markers().await.unwrap();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].value, "b");
    }
}
