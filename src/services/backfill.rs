//! Historical initialisation of day records.
//!
//! Walks every day from the start date up to yesterday, fetching each missing
//! day at 5-minute resolution. Existing days are skipped, so an interrupted
//! run resumes where it stopped. The first provider error ends the run.
//! Afterwards the backfill rollup policy builds months and years.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Months, NaiveDate};
use serde::Serialize;

use crate::db::models::{PeriodType, Station};
use crate::db::Store;
use crate::errors::AppError;
use crate::helpers::day_key;
use crate::services::aggregation::AggregationEngine;
use crate::services::fetcher::FallbackFetcher;

/// History fetched when no day limit is configured.
const DEFAULT_HISTORY_YEARS: u32 = 5;

/// Pause between provider requests (milliseconds).
const DEFAULT_DELAY_MS: u64 = 200;

/// Log progress every N days.
const PROGRESS_LOG_EVERY: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillOptions {
    /// Only the last N days instead of the full history
    pub days: Option<u32>,
    pub delay: StdDuration,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            days: None,
            delay: StdDuration::from_millis(DEFAULT_DELAY_MS),
        }
    }
}

impl BackfillOptions {
    /// Read `BACKFILL_DAYS` and `BACKFILL_DELAY_MS`.
    pub fn from_env() -> Result<Self, AppError> {
        let days = match std::env::var("BACKFILL_DAYS") {
            Ok(v) if !v.trim().is_empty() => Some(v.trim().parse().map_err(|_| {
                AppError::ConfigError("BACKFILL_DAYS must be a positive number".to_string())
            })?),
            _ => None,
        };
        let delay_ms = match std::env::var("BACKFILL_DELAY_MS") {
            Ok(v) if !v.trim().is_empty() => v.trim().parse().map_err(|_| {
                AppError::ConfigError("BACKFILL_DELAY_MS must be a number".to_string())
            })?,
            _ => DEFAULT_DELAY_MS,
        };
        Ok(Self {
            days,
            delay: StdDuration::from_millis(delay_ms),
        })
    }

    /// First day to backfill when running on `today`.
    pub fn start_date(&self, today: NaiveDate) -> NaiveDate {
        match self.days {
            Some(days) => today - Duration::days(i64::from(days)),
            None => today
                .checked_sub_months(Months::new(12 * DEFAULT_HISTORY_YEARS))
                .unwrap_or(today),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillSummary {
    pub days_fetched: usize,
    pub days_skipped: usize,
    pub months_written: usize,
    pub years_written: usize,
    pub day_records: u64,
    pub month_records: u64,
    pub year_records: u64,
}

pub struct Backfill {
    store: Arc<dyn Store>,
    fetcher: FallbackFetcher,
    engine: AggregationEngine,
    options: BackfillOptions,
}

impl Backfill {
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: FallbackFetcher,
        engine: AggregationEngine,
        options: BackfillOptions,
    ) -> Self {
        Self {
            store,
            fetcher,
            engine,
            options,
        }
    }

    /// Backfill every station up to (not including) `today`.
    pub async fn run(&self, stations: &[Station], today: NaiveDate) -> Result<BackfillSummary, AppError> {
        let start = self.options.start_date(today);
        tracing::info!(
            "Backfilling {} station(s) from {} to {}",
            stations.len(),
            start,
            today - Duration::days(1)
        );

        let mut summary = BackfillSummary::default();
        for station in stations {
            self.backfill_days(station, start, today, &mut summary).await?;
        }

        tracing::info!("Calculating monthly and yearly totals");
        for station in stations {
            let rollup = self.engine.backfill_station(station.id).await?;
            summary.months_written += rollup.months_written;
            summary.years_written += rollup.years_written;
        }

        summary.day_records = self.store.count_records(PeriodType::Day).await?;
        summary.month_records = self.store.count_records(PeriodType::Month).await?;
        summary.year_records = self.store.count_records(PeriodType::Year).await?;
        Ok(summary)
    }

    async fn backfill_days(
        &self,
        station: &Station,
        start: NaiveDate,
        today: NaiveDate,
        summary: &mut BackfillSummary,
    ) -> Result<(), AppError> {
        let total_days = (today - start).num_days().max(0) as usize;
        tracing::info!("Station {} ({}): {} days", station.id, station.name, total_days);

        let mut processed = 0usize;
        let mut date = start;
        while date < today {
            processed += 1;
            let key = day_key(date);

            if self
                .store
                .get_record(station.id, PeriodType::Day, &key)
                .await?
                .is_some()
            {
                summary.days_skipped += 1;
            } else {
                let total = self
                    .fetcher
                    .store_day_total(station, date)
                    .await
                    .map_err(|e| {
                        tracing::error!(
                            "[{}/{}] {} failed: {}. Stopping; re-run to resume from here.",
                            processed,
                            total_days,
                            key,
                            e
                        );
                        e
                    })?;
                summary.days_fetched += 1;
                if processed % PROGRESS_LOG_EVERY == 0 {
                    tracing::info!("[{}/{}] {} = {} mm", processed, total_days, key, total);
                }
                if !self.options.delay.is_zero() {
                    tokio::time::sleep(self.options.delay).await;
                }
            }
            date += Duration::days(1);
        }
        Ok(())
    }
}
