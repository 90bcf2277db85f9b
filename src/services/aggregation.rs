//! Rollups over the `day → month → year` ladder.
//!
//! Every rollup is a pure function of the stored records below it, so it can
//! be re-run at any time with the same result. Two policies decide whether an
//! existing total may be replaced:
//!
//! - [`RollupPolicy::Backfill`] leaves finalized months and years alone.
//! - [`RollupPolicy::Live`] always recomputes.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::models::PeriodType;
use crate::db::Store;
use crate::errors::AppError;
use crate::helpers::{first_of_previous_month, month_key, sum_mm, year_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollupPolicy {
    /// Compute a period only if no total exists yet.
    Backfill,
    /// Recompute unconditionally.
    Live,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RollupOutcome {
    Written { total_mm: f64, inputs: usize },
    SkippedExisting,
    /// Nothing below this period; no record written.
    NoData,
}

/// Counts from a full-history rollup of one station.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct BackfillRollupSummary {
    pub months_written: usize,
    pub months_skipped: usize,
    pub years_written: usize,
    pub years_skipped: usize,
}

/// Keys touched by a live aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct LiveRollupSummary {
    pub finalized_month: Option<String>,
    pub finalized_year: Option<String>,
    pub month: String,
    pub month_total_mm: f64,
    pub year: String,
    pub year_total_mm: f64,
}

#[derive(Clone)]
pub struct AggregationEngine {
    store: Arc<dyn Store>,
}

impl AggregationEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Sum the day records of `month` (`YYYY-MM`) into the month total.
    pub async fn rollup_month(
        &self,
        station_id: i64,
        month: &str,
        policy: RollupPolicy,
    ) -> Result<RollupOutcome, AppError> {
        self.rollup(station_id, PeriodType::Day, PeriodType::Month, month, policy)
            .await
    }

    /// Sum the month records of `year` (`YYYY`) into the year total.
    pub async fn rollup_year(
        &self,
        station_id: i64,
        year: &str,
        policy: RollupPolicy,
    ) -> Result<RollupOutcome, AppError> {
        self.rollup(station_id, PeriodType::Month, PeriodType::Year, year, policy)
            .await
    }

    async fn rollup(
        &self,
        station_id: i64,
        source: PeriodType,
        target: PeriodType,
        key: &str,
        policy: RollupPolicy,
    ) -> Result<RollupOutcome, AppError> {
        if policy == RollupPolicy::Backfill
            && self.store.get_record(station_id, target, key).await?.is_some()
        {
            tracing::debug!("Station {}: {} {} already exists, skipping", station_id, target, key);
            return Ok(RollupOutcome::SkippedExisting);
        }

        // Trailing separator so "2024-1" can never match "2024-10".
        let prefix = format!("{}-", key);
        let inputs = self
            .store
            .query_records_with_prefix(station_id, source, &prefix)
            .await?;
        if inputs.is_empty() {
            return Ok(RollupOutcome::NoData);
        }

        let total_mm = sum_mm(inputs.iter().map(|r| r.amount_mm));
        self.store
            .upsert_record(station_id, target, key, total_mm)
            .await?;
        tracing::debug!(
            "Station {}: {} {} = {} mm from {} {} records",
            station_id,
            target,
            key,
            total_mm,
            inputs.len(),
            source
        );
        Ok(RollupOutcome::Written {
            total_mm,
            inputs: inputs.len(),
        })
    }

    /// Daily aggregation for `today`.
    ///
    /// On the first of a month the previous month is finalized before the
    /// current one is recomputed; on January 1st the previous year likewise.
    /// The current month and year always end up with a record, `0` if empty.
    pub async fn run_live(
        &self,
        station_id: i64,
        today: NaiveDate,
    ) -> Result<LiveRollupSummary, AppError> {
        let mut summary = LiveRollupSummary::default();

        if today.day() == 1 {
            let previous = month_key(first_of_previous_month(today));
            self.rollup_month(station_id, &previous, RollupPolicy::Live)
                .await?;
            tracing::info!("Station {}: finalized month {}", station_id, previous);
            summary.finalized_month = Some(previous);
        }

        summary.month = month_key(today);
        summary.month_total_mm = self
            .recompute_or_zero(station_id, PeriodType::Month, &summary.month)
            .await?;

        if today.day() == 1 && today.month() == 1 {
            let previous = year_key(today.year() - 1);
            self.rollup_year(station_id, &previous, RollupPolicy::Live)
                .await?;
            tracing::info!("Station {}: finalized year {}", station_id, previous);
            summary.finalized_year = Some(previous);
        }

        summary.year = year_key(today.year());
        summary.year_total_mm = self
            .recompute_or_zero(station_id, PeriodType::Year, &summary.year)
            .await?;

        Ok(summary)
    }

    async fn recompute_or_zero(
        &self,
        station_id: i64,
        target: PeriodType,
        key: &str,
    ) -> Result<f64, AppError> {
        let outcome = match target {
            PeriodType::Year => self.rollup_year(station_id, key, RollupPolicy::Live).await?,
            _ => self.rollup_month(station_id, key, RollupPolicy::Live).await?,
        };
        match outcome {
            RollupOutcome::Written { total_mm, .. } => Ok(total_mm),
            _ => {
                self.store.upsert_record(station_id, target, key, 0.0).await?;
                Ok(0.0)
            }
        }
    }

    /// Roll up every month present in the day records, then every year present
    /// in the month records, without touching existing totals.
    pub async fn backfill_station(&self, station_id: i64) -> Result<BackfillRollupSummary, AppError> {
        let mut summary = BackfillRollupSummary::default();

        let months: BTreeSet<String> = self
            .store
            .query_records(station_id, PeriodType::Day, None)
            .await?
            .into_iter()
            .filter_map(|r| r.period_value.get(..7).map(str::to_string))
            .collect();
        for month in &months {
            match self
                .rollup_month(station_id, month, RollupPolicy::Backfill)
                .await?
            {
                RollupOutcome::Written { .. } => summary.months_written += 1,
                RollupOutcome::SkippedExisting => summary.months_skipped += 1,
                RollupOutcome::NoData => {}
            }
        }

        let years: BTreeSet<String> = self
            .store
            .query_records(station_id, PeriodType::Month, None)
            .await?
            .into_iter()
            .filter_map(|r| r.period_value.get(..4).map(str::to_string))
            .collect();
        for year in &years {
            match self
                .rollup_year(station_id, year, RollupPolicy::Backfill)
                .await?
            {
                RollupOutcome::Written { .. } => summary.years_written += 1,
                RollupOutcome::SkippedExisting => summary.years_skipped += 1,
                RollupOutcome::NoData => {}
            }
        }

        tracing::info!(
            "Station {}: backfill rollup wrote {} months and {} years ({} months, {} years already present)",
            station_id,
            summary.months_written,
            summary.years_written,
            summary.months_skipped,
            summary.years_skipped
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;

    const STATION: i64 = 1;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn assert_mm(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {} mm, got {} mm",
            expected,
            actual
        );
    }

    async fn engine_with_days(days: &[(&str, f64)]) -> (AggregationEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for (key, mm) in days {
            store
                .upsert_record(STATION, PeriodType::Day, key, *mm)
                .await
                .unwrap();
        }
        (AggregationEngine::new(store.clone()), store)
    }

    async fn amount(store: &MemoryStore, period: PeriodType, key: &str) -> Option<f64> {
        store
            .get_record(STATION, period, key)
            .await
            .unwrap()
            .map(|r| r.amount_mm)
    }

    #[tokio::test]
    async fn test_june_scenario_backfill_then_live() {
        let (engine, store) = engine_with_days(&[
            ("2024-06-01", 3.0),
            ("2024-06-02", 0.0),
            ("2024-06-03", 5.2),
        ])
        .await;

        engine.backfill_station(STATION).await.unwrap();
        assert_mm(amount(&store, PeriodType::Month, "2024-06").await.unwrap(), 8.2);
        assert_mm(amount(&store, PeriodType::Year, "2024").await.unwrap(), 8.2);

        // Rerunning the backfill changes nothing.
        let rerun = engine.backfill_station(STATION).await.unwrap();
        assert_eq!(rerun.months_written, 0);
        assert_eq!(rerun.months_skipped, 1);
        assert_mm(amount(&store, PeriodType::Month, "2024-06").await.unwrap(), 8.2);

        // A new day is invisible to backfill but picked up by the live pass.
        store
            .upsert_record(STATION, PeriodType::Day, "2024-06-04", 1.0)
            .await
            .unwrap();
        engine.backfill_station(STATION).await.unwrap();
        assert_mm(amount(&store, PeriodType::Month, "2024-06").await.unwrap(), 8.2);

        let live = engine.run_live(STATION, date("2024-06-04")).await.unwrap();
        assert_mm(live.month_total_mm, 9.2);
        assert_mm(amount(&store, PeriodType::Month, "2024-06").await.unwrap(), 9.2);
        assert_mm(amount(&store, PeriodType::Year, "2024").await.unwrap(), 9.2);
    }

    #[tokio::test]
    async fn test_zero_day_counts_toward_month() {
        let (engine, store) = engine_with_days(&[("2024-02-10", 0.0)]).await;

        let outcome = engine
            .rollup_month(STATION, "2024-02", RollupPolicy::Backfill)
            .await
            .unwrap();
        assert_eq!(outcome, RollupOutcome::Written { total_mm: 0.0, inputs: 1 });
        assert_eq!(amount(&store, PeriodType::Month, "2024-02").await, Some(0.0));
    }

    #[tokio::test]
    async fn test_month_without_days_is_not_written() {
        let (engine, store) = engine_with_days(&[("2024-06-01", 3.0)]).await;

        let outcome = engine
            .rollup_month(STATION, "2024-07", RollupPolicy::Live)
            .await
            .unwrap();
        assert_eq!(outcome, RollupOutcome::NoData);
        assert_eq!(amount(&store, PeriodType::Month, "2024-07").await, None);
    }

    #[tokio::test]
    async fn test_month_prefix_does_not_leak_into_other_months() {
        let (engine, store) =
            engine_with_days(&[("2024-01-31", 1.0), ("2024-10-01", 7.0), ("2024-11-02", 2.0)]).await;

        engine
            .rollup_month(STATION, "2024-10", RollupPolicy::Live)
            .await
            .unwrap();
        assert_mm(amount(&store, PeriodType::Month, "2024-10").await.unwrap(), 7.0);
    }

    #[tokio::test]
    async fn test_live_writes_zero_for_empty_current_period() {
        let (engine, store) = engine_with_days(&[]).await;

        let summary = engine.run_live(STATION, date("2024-07-15")).await.unwrap();
        assert_eq!(summary.finalized_month, None);
        assert_eq!(amount(&store, PeriodType::Month, "2024-07").await, Some(0.0));
        assert_eq!(amount(&store, PeriodType::Year, "2024").await, Some(0.0));
    }

    #[tokio::test]
    async fn test_live_finalizes_previous_month_on_the_first() {
        let (engine, store) =
            engine_with_days(&[("2024-05-30", 1.5), ("2024-05-31", 2.0)]).await;
        // A stale total computed before the last day of May landed.
        store
            .upsert_record(STATION, PeriodType::Month, "2024-05", 1.5)
            .await
            .unwrap();

        let summary = engine.run_live(STATION, date("2024-06-01")).await.unwrap();
        assert_eq!(summary.finalized_month.as_deref(), Some("2024-05"));
        assert_mm(amount(&store, PeriodType::Month, "2024-05").await.unwrap(), 3.5);
        assert_eq!(amount(&store, PeriodType::Month, "2024-06").await, Some(0.0));
        assert_mm(amount(&store, PeriodType::Year, "2024").await.unwrap(), 3.5);
    }

    #[tokio::test]
    async fn test_live_finalizes_previous_year_on_january_first() {
        let (engine, store) = engine_with_days(&[("2024-11-05", 1.0), ("2024-12-31", 4.0)]).await;
        store
            .upsert_record(STATION, PeriodType::Month, "2024-11", 1.0)
            .await
            .unwrap();

        let summary = engine.run_live(STATION, date("2025-01-01")).await.unwrap();
        assert_eq!(summary.finalized_month.as_deref(), Some("2024-12"));
        assert_eq!(summary.finalized_year.as_deref(), Some("2024"));
        assert_mm(amount(&store, PeriodType::Month, "2024-12").await.unwrap(), 4.0);
        assert_mm(amount(&store, PeriodType::Year, "2024").await.unwrap(), 5.0);
        assert_eq!(amount(&store, PeriodType::Month, "2025-01").await, Some(0.0));
        assert_eq!(amount(&store, PeriodType::Year, "2025").await, Some(0.0));
    }

    #[tokio::test]
    async fn test_backfill_never_overwrites_finalized_year() {
        let (engine, store) = engine_with_days(&[("2023-03-01", 2.0)]).await;
        store
            .upsert_record(STATION, PeriodType::Year, "2023", 100.0)
            .await
            .unwrap();

        let summary = engine.backfill_station(STATION).await.unwrap();
        assert_eq!(summary.months_written, 1);
        assert_eq!(summary.years_skipped, 1);
        assert_eq!(amount(&store, PeriodType::Year, "2023").await, Some(100.0));
    }

    #[tokio::test]
    async fn test_backfill_spans_multiple_years() {
        let (engine, store) = engine_with_days(&[
            ("2022-12-31", 1.0),
            ("2023-01-01", 2.0),
            ("2023-02-01", 3.0),
        ])
        .await;

        let summary = engine.backfill_station(STATION).await.unwrap();
        assert_eq!(summary.months_written, 3);
        assert_eq!(summary.years_written, 2);
        assert_mm(amount(&store, PeriodType::Year, "2022").await.unwrap(), 1.0);
        assert_mm(amount(&store, PeriodType::Year, "2023").await.unwrap(), 5.0);
    }
}
