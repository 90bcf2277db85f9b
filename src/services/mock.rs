//! Scripted provider for unit tests.
//!
//! Counts every call and lets a test inject failures per resolution, an
//! expired-token signal, slow or failing token exchanges.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::models::NewStation;
use crate::errors::AppError;
use crate::services::provider::{MeasureQuery, MeasurementProvider, Resolution, Sample, TokenGrant};

#[derive(Debug, Default)]
pub struct ScriptedProvider {
    pub exchange_calls: AtomicUsize,
    pub measure_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    exchange_delay_ms: AtomicUsize,
    fail_exchange: AtomicBool,
    fail_measurements: AtomicBool,
    expire_next_measure: AtomicBool,
    samples: Mutex<HashMap<Resolution, Vec<f64>>>,
    failing: Mutex<Vec<Resolution>>,
    stations: Mutex<Vec<NewStation>>,
    seen_tokens: Mutex<Vec<String>>,
    seen_queries: Mutex<Vec<MeasureQuery>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exchange_delay(self, delay: Duration) -> Self {
        self.exchange_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
        self
    }

    pub fn set_fail_exchange(&self, fail: bool) {
        self.fail_exchange.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_measurements(&self, fail: bool) {
        self.fail_measurements.store(fail, Ordering::SeqCst);
    }

    /// Fail only the calls made at `resolution`.
    pub fn fail_resolution(&self, resolution: Resolution) {
        self.failing.lock().unwrap().push(resolution);
    }

    /// Answer the next measure call with the expired-token signal.
    pub fn expire_next_measure(&self) {
        self.expire_next_measure.store(true, Ordering::SeqCst);
    }

    pub fn set_samples(&self, resolution: Resolution, values: &[f64]) {
        self.samples
            .lock()
            .unwrap()
            .insert(resolution, values.to_vec());
    }

    pub fn set_stations(&self, stations: Vec<NewStation>) {
        *self.stations.lock().unwrap() = stations;
    }

    pub fn seen_tokens(&self) -> Vec<String> {
        self.seen_tokens.lock().unwrap().clone()
    }

    pub fn seen_queries(&self) -> Vec<MeasureQuery> {
        self.seen_queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl MeasurementProvider for ScriptedProvider {
    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, AppError> {
        let n = self.exchange_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.exchange_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.fail_exchange.load(Ordering::SeqCst) {
            return Err(AppError::AuthError(format!(
                "refresh token '{}' rejected",
                refresh_token
            )));
        }
        Ok(TokenGrant {
            access_token: format!("access-{}", n),
            refresh_token: format!("refresh-{}", n),
            expires_in_secs: 10_800,
        })
    }

    async fn list_stations(&self, access_token: &str) -> Result<Vec<NewStation>, AppError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_tokens
            .lock()
            .unwrap()
            .push(access_token.to_string());
        if self.fail_measurements.load(Ordering::SeqCst) {
            return Err(AppError::ProviderUnavailable("scripted outage".to_string()));
        }
        Ok(self.stations.lock().unwrap().clone())
    }

    async fn get_measurements(
        &self,
        access_token: &str,
        query: &MeasureQuery,
    ) -> Result<Vec<Sample>, AppError> {
        self.measure_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_tokens
            .lock()
            .unwrap()
            .push(access_token.to_string());
        self.seen_queries.lock().unwrap().push(query.clone());

        if self.expire_next_measure.swap(false, Ordering::SeqCst) {
            return Err(AppError::TokenExpired);
        }
        if self.fail_measurements.load(Ordering::SeqCst)
            || self.failing.lock().unwrap().contains(&query.resolution)
        {
            return Err(AppError::ProviderUnavailable("scripted outage".to_string()));
        }

        let values = self
            .samples
            .lock()
            .unwrap()
            .get(&query.resolution)
            .cloned()
            .unwrap_or_default();
        Ok(values
            .into_iter()
            .enumerate()
            .map(|(i, value)| Sample {
                timestamp: query.start + chrono::Duration::minutes(5 * i as i64),
                value,
            })
            .collect())
    }
}

/// A station as the provider would report it.
pub fn rain_gauge(module_id: &str) -> NewStation {
    NewStation {
        device_id: "70:ee:50:00:00:01".to_string(),
        module_id: module_id.to_string(),
        name: format!("Gauge {}", module_id),
        location: "Zurich".to_string(),
    }
}

/// Parse an RFC 3339 literal in tests.
pub fn at(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}
