//! Live-first rainfall reads with per-period cache fallback.
//!
//! For each of the short windows (`30min`, `1hour`, `3hours`) and for `today`
//! the fetcher asks the provider, stores the fresh total and labels it `api`.
//! When the provider call for a period fails, that period is answered from the
//! newest cached record instead and labelled `cache`. If no access token can
//! be obtained at all, every period is answered from the cache. A period with
//! neither a live value nor a cached one is left out. Only an unknown station
//! makes the read fail.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::models::{
    MeasurementRecord, PeriodType, Station, MARKER_LAST_API_SUCCESS, SHORT_PERIODS,
};
use crate::db::Store;
use crate::errors::AppError;
use crate::helpers::{day_key, instant_key, start_of_day, sum_mm};
use crate::services::provider::{MeasureQuery, MeasurementProvider, Resolution};
use crate::services::token::TokenManager;

/// Label of the calendar-day reading in responses.
pub const TODAY: &str = "today";

/// Where a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Api,
    Cache,
    Mixed,
}

/// One period of a current-rainfall answer.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PeriodReading {
    /// `30min`, `1hour`, `3hours` or `today`
    pub period: String,
    pub amount_mm: f64,
    /// Key of the record that holds this value
    pub period_value: String,
    pub source: Source,
    /// When the value was written (cache) or fetched (api)
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CurrentRainfall {
    pub station: Station,
    pub periods: Vec<PeriodReading>,
    /// `api` when every period is live, `cache` when none is, `mixed` otherwise
    pub source: Source,
    /// True only when at least one period was returned and all of them are live
    pub fresh: bool,
    pub fetched_at: DateTime<Utc>,
}

impl CurrentRainfall {
    fn assemble(station: Station, periods: Vec<PeriodReading>, fetched_at: DateTime<Utc>) -> Self {
        let live = periods.iter().filter(|p| p.source == Source::Api).count();
        let source = if live == 0 {
            Source::Cache
        } else if live == periods.len() {
            Source::Api
        } else {
            Source::Mixed
        };
        Self {
            fresh: source == Source::Api,
            station,
            periods,
            source,
            fetched_at,
        }
    }

    pub fn reading(&self, period: &str) -> Option<&PeriodReading> {
        self.periods.iter().find(|p| p.period == period)
    }
}

#[derive(Clone)]
pub struct FallbackFetcher {
    store: Arc<dyn Store>,
    provider: Arc<dyn MeasurementProvider>,
    tokens: TokenManager,
}

impl FallbackFetcher {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn MeasurementProvider>,
        tokens: TokenManager,
    ) -> Self {
        Self {
            store,
            provider,
            tokens,
        }
    }

    /// Freshest value for every short period and for today.
    pub async fn fetch_current(&self, station_id: i64) -> Result<CurrentRainfall, AppError> {
        let station = self
            .store
            .get_station(station_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Station {} not found", station_id)))?;
        let now = Utc::now();
        let today = now.date_naive();

        let online = match self.tokens.get_access_token().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(
                    "Station {}: no access token ({}), answering from cache",
                    station.id,
                    e
                );
                false
            }
        };

        let mut periods = Vec::with_capacity(SHORT_PERIODS.len() + 1);
        let mut any_live = false;

        for period in SHORT_PERIODS {
            let live = if online {
                match self.store_short_period(&station, period, now).await {
                    Ok(reading) => Some(reading),
                    Err(e) => {
                        tracing::warn!(
                            "Station {}: live {} failed ({}), falling back to cache",
                            station.id,
                            period,
                            e
                        );
                        None
                    }
                }
            } else {
                None
            };
            match live {
                Some(reading) => {
                    any_live = true;
                    periods.push(reading);
                }
                None => {
                    let cached = self.cached(self.store.latest_record(station.id, period)).await;
                    periods.extend(cached.map(|r| from_cache(period.as_str(), r)));
                }
            }
        }

        let today_live = if online {
            match self.store_day_total(&station, today).await {
                Ok(total) => Some(PeriodReading {
                    period: TODAY.to_string(),
                    amount_mm: total,
                    period_value: day_key(today),
                    source: Source::Api,
                    recorded_at: now,
                }),
                Err(e) => {
                    tracing::warn!(
                        "Station {}: live today total failed ({}), falling back to cache",
                        station.id,
                        e
                    );
                    None
                }
            }
        } else {
            None
        };
        match today_live {
            Some(reading) => {
                any_live = true;
                periods.push(reading);
            }
            None => {
                let key = day_key(today);
                let cached = self
                    .cached(self.store.get_record(station.id, PeriodType::Day, &key))
                    .await;
                periods.extend(cached.map(|r| from_cache(TODAY, r)));
            }
        }

        if any_live {
            self.mark_api_success(now).await;
        }

        Ok(CurrentRainfall::assemble(station, periods, now))
    }

    /// Total of the provider samples in `[start, end]` at `resolution`.
    pub async fn fetch_window_total(
        &self,
        station: &Station,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        resolution: Resolution,
    ) -> Result<f64, AppError> {
        let query = MeasureQuery {
            device_id: station.device_id.clone(),
            module_id: station.module_id.clone(),
            start,
            end,
            resolution,
        };
        let samples = self
            .tokens
            .with_access_token(|token| {
                let provider = Arc::clone(&self.provider);
                let query = query.clone();
                async move { provider.get_measurements(&token, &query).await }
            })
            .await?;
        Ok(sum_mm(samples.iter().map(|s| s.value)))
    }

    /// Fetch and store every short period, keyed by `now`.
    ///
    /// One result per period; a failing period does not stop the others.
    pub async fn store_short_periods(
        &self,
        station: &Station,
        now: DateTime<Utc>,
    ) -> Vec<(PeriodType, Result<PeriodReading, AppError>)> {
        let mut results = Vec::with_capacity(SHORT_PERIODS.len());
        for period in SHORT_PERIODS {
            results.push((period, self.store_short_period(station, period, now).await));
        }
        results
    }

    /// Store client-supplied short-period totals, keyed by the current time.
    pub async fn record_client_values(
        &self,
        station_id: i64,
        values: &[(PeriodType, f64)],
    ) -> Result<usize, AppError> {
        if self.store.get_station(station_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Station {} not found", station_id)));
        }
        if let Some((period, _)) = values.iter().find(|(p, _)| p.window().is_none()) {
            return Err(AppError::BadRequest(format!(
                "'{}' is not a sub-day period; expected one of 30min, 1hour, 3hours",
                period
            )));
        }
        if let Some((period, _)) = values.iter().find(|(_, mm)| !mm.is_finite() || *mm < 0.0) {
            return Err(AppError::BadRequest(format!(
                "Amount for '{}' must be a non-negative number",
                period
            )));
        }

        let now = Utc::now();
        let key = instant_key(now);
        for (period, mm) in values {
            self.store.upsert_record(station_id, *period, &key, *mm).await?;
        }
        self.mark_api_success(now).await;
        Ok(values.len())
    }

    /// Fetch the rain that fell on `date` (up to now for today) at 5-minute
    /// resolution and store it as the day record. No samples store `0`.
    pub async fn store_day_total(&self, station: &Station, date: NaiveDate) -> Result<f64, AppError> {
        let start = start_of_day(date);
        let end = (start + Duration::days(1)).min(Utc::now());
        let total = self
            .fetch_window_total(station, start, end, Resolution::FiveMinutes)
            .await?;
        self.store
            .upsert_record(station.id, PeriodType::Day, &day_key(date), total)
            .await?;
        tracing::debug!("Station {}: day {} = {} mm", station.id, date, total);
        Ok(total)
    }

    pub async fn mark_api_success(&self, at: DateTime<Utc>) {
        if let Err(e) = self
            .store
            .set_status_marker(MARKER_LAST_API_SUCCESS, &instant_key(at))
            .await
        {
            tracing::warn!("Failed to update {} marker: {}", MARKER_LAST_API_SUCCESS, e);
        }
    }

    async fn store_short_period(
        &self,
        station: &Station,
        period: PeriodType,
        now: DateTime<Utc>,
    ) -> Result<PeriodReading, AppError> {
        let window = period.window().ok_or_else(|| {
            AppError::InternalError(format!("{} is not a sub-day period", period))
        })?;
        let total = self
            .fetch_window_total(station, now - window, now, Resolution::native_for(period))
            .await?;
        let key = instant_key(now);
        self.store
            .upsert_record(station.id, period, &key, total)
            .await?;
        Ok(PeriodReading {
            period: period.as_str().to_string(),
            amount_mm: total,
            period_value: key,
            source: Source::Api,
            recorded_at: now,
        })
    }

    /// Resolve a cache lookup, treating a store failure like a miss.
    async fn cached<F>(&self, lookup: F) -> Option<MeasurementRecord>
    where
        F: std::future::Future<Output = Result<Option<MeasurementRecord>, AppError>>,
    {
        match lookup.await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!("Cache lookup failed: {}", e);
                None
            }
        }
    }
}

fn from_cache(period: &str, record: MeasurementRecord) -> PeriodReading {
    PeriodReading {
        period: period.to_string(),
        amount_mm: record.amount_mm,
        period_value: record.period_value,
        source: Source::Cache,
        recorded_at: record.created_at,
    }
}
