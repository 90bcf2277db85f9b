//! Background jobs.
//!
//! Three independent loops, each spawned on its own task:
//!
//! - token refresh every 150 minutes
//! - hourly update at minute 0: short-period caches and today's total
//! - daily update at 01:00 UTC: yesterday's final total, then live aggregation
//!
//! A failing run is logged and recorded in [`SchedulerState`]; the loop just
//! waits for its next firing. State is in-memory (`Arc<RwLock<SchedulerState>>`)
//! and exposed read-only over HTTP.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use utoipa::ToSchema;

use crate::db::models::MARKER_LAST_AGGREGATES_CALCULATION;
use crate::db::Store;
use crate::errors::AppError;
use crate::helpers::instant_key;
use crate::services::aggregation::AggregationEngine;
use crate::services::fetcher::FallbackFetcher;
use crate::services::token::TokenManager;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Token refresh interval (minutes). Tokens live 3 hours.
const TOKEN_REFRESH_INTERVAL_MINS: i64 = 150;

/// Hour of day (UTC) at which the daily job runs.
const DAILY_JOB_HOUR: u32 = 1;

// ---------------------------------------------------------------------------
// Scheduler state (in-memory, shared via Arc<RwLock<>>)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    TokenRefresh,
    Hourly,
    Daily,
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::TokenRefresh => "token_refresh",
            Job::Hourly => "hourly_update",
            Job::Daily => "daily_update",
        }
    }

    fn schedule(&self) -> &'static str {
        match self {
            Job::TokenRefresh => "every 150 minutes",
            Job::Hourly => "every hour at :00",
            Job::Daily => "every day at 01:00 UTC",
        }
    }
}

/// Status of one job's most recent run.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JobStatus {
    pub name: String,
    pub schedule: String,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    /// "running", "ok: <summary>" or "error: <message>"
    pub last_result: Option<String>,
    pub total_runs: u64,
    pub total_failures: u64,
}

impl JobStatus {
    fn new(job: Job) -> Self {
        Self {
            name: job.name().to_string(),
            schedule: job.schedule().to_string(),
            next_run_at: None,
            last_started_at: None,
            last_finished_at: None,
            last_duration_ms: None,
            last_result: None,
            total_runs: 0,
            total_failures: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SchedulerState {
    pub active: bool,
    pub token_refresh: JobStatus,
    pub hourly_update: JobStatus,
    pub daily_update: JobStatus,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self {
            active: false,
            token_refresh: JobStatus::new(Job::TokenRefresh),
            hourly_update: JobStatus::new(Job::Hourly),
            daily_update: JobStatus::new(Job::Daily),
        }
    }

    fn job_mut(&mut self, job: Job) -> &mut JobStatus {
        match job {
            Job::TokenRefresh => &mut self.token_refresh,
            Job::Hourly => &mut self.hourly_update,
            Job::Daily => &mut self.daily_update,
        }
    }
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared scheduler state handle.
pub type SharedSchedulerState = Arc<RwLock<SchedulerState>>;

// ---------------------------------------------------------------------------
// Trigger times
// ---------------------------------------------------------------------------

/// First top of the hour strictly after `after`.
pub fn next_hourly_run(after: DateTime<Utc>) -> DateTime<Utc> {
    let floored = after
        .date_naive()
        .and_hms_opt(after.hour(), 0, 0)
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(after);
    floored + Duration::hours(1)
}

/// First 01:00 UTC strictly after `after`.
pub fn next_daily_run(after: DateTime<Utc>) -> DateTime<Utc> {
    let today_run = after
        .date_naive()
        .and_hms_opt(DAILY_JOB_HOUR, 0, 0)
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(after);
    if today_run > after {
        today_run
    } else {
        today_run + Duration::days(1)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn Store>,
    tokens: TokenManager,
    fetcher: FallbackFetcher,
    engine: AggregationEngine,
    state: SharedSchedulerState,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        tokens: TokenManager,
        fetcher: FallbackFetcher,
        engine: AggregationEngine,
        state: SharedSchedulerState,
    ) -> Self {
        Self {
            store,
            tokens,
            fetcher,
            engine,
            state,
        }
    }

    /// Spawn the three job loops. They run until process exit.
    pub async fn start(self) -> Vec<JoinHandle<()>> {
        self.state.write().await.active = true;
        tracing::info!(
            "Scheduler started: token refresh {}, hourly update {}, daily update {}",
            Job::TokenRefresh.schedule(),
            Job::Hourly.schedule(),
            Job::Daily.schedule()
        );
        vec![
            tokio::spawn(self.clone().run_token_refresh_loop()),
            tokio::spawn(self.clone().run_clock_loop(Job::Hourly)),
            tokio::spawn(self.run_clock_loop(Job::Daily)),
        ]
    }

    async fn run_token_refresh_loop(self) {
        let period = Duration::minutes(TOKEN_REFRESH_INTERVAL_MINS);
        let std_period = std::time::Duration::from_secs(TOKEN_REFRESH_INTERVAL_MINS as u64 * 60);
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + std_period, std_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.set_next_run(Job::TokenRefresh, Utc::now() + period).await;
            ticker.tick().await;
            self.run_job(Job::TokenRefresh).await;
        }
    }

    /// Loop for the wall-clock jobs. Each firing is strictly later than the
    /// previous one, so an early wakeup can never run a slot twice.
    async fn run_clock_loop(self, job: Job) {
        let mut last_slot: Option<DateTime<Utc>> = None;
        loop {
            let now = Utc::now();
            let after = last_slot.map_or(now, |slot| slot.max(now));
            let next = match job {
                Job::Daily => next_daily_run(after),
                _ => next_hourly_run(after),
            };
            self.set_next_run(job, next).await;
            tracing::debug!("Scheduler: {} sleeping until {}", job.name(), next);

            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            last_slot = Some(next);
            self.run_job(job).await;
        }
    }

    async fn set_next_run(&self, job: Job, at: DateTime<Utc>) {
        self.state.write().await.job_mut(job).next_run_at = Some(at);
    }

    /// Run one job now and record the outcome. Never fails.
    pub async fn run_job(&self, job: Job) {
        let started_at = Utc::now();
        let clock = Instant::now();
        {
            let mut s = self.state.write().await;
            let status = s.job_mut(job);
            status.last_started_at = Some(started_at);
            status.last_result = Some("running".to_string());
        }
        tracing::info!("Scheduler: running {}", job.name());

        let result = match job {
            Job::TokenRefresh => self.token_refresh_job().await,
            Job::Hourly => self.hourly_job().await,
            Job::Daily => self.daily_job().await,
        };

        let duration_ms = clock.elapsed().as_millis() as u64;
        let mut s = self.state.write().await;
        let status = s.job_mut(job);
        status.last_finished_at = Some(Utc::now());
        status.last_duration_ms = Some(duration_ms);
        status.total_runs += 1;
        match result {
            Ok(summary) => {
                tracing::info!("Scheduler: {} completed in {}ms: {}", job.name(), duration_ms, summary);
                status.last_result = Some(format!("ok: {}", summary));
            }
            Err(e) => {
                tracing::error!("Scheduler: {} failed after {}ms: {}", job.name(), duration_ms, e);
                status.total_failures += 1;
                status.last_result = Some(format!("error: {}", e));
            }
        }
    }

    pub async fn token_refresh_job(&self) -> Result<String, AppError> {
        let tokens = self.tokens.refresh().await?;
        Ok(format!("tokens valid until {}", tokens.expires_at))
    }

    /// Refresh the short-period caches and today's running total of every
    /// station.
    pub async fn hourly_job(&self) -> Result<String, AppError> {
        let stations = self.store.list_stations().await?;
        if stations.is_empty() {
            return Ok("no stations".to_string());
        }
        // Without a token every fetch would fail the same way.
        self.tokens.get_access_token().await?;

        let now = Utc::now();
        let today = now.date_naive();
        let mut stored = 0usize;
        let mut failed = 0usize;

        for station in &stations {
            for (period, result) in self.fetcher.store_short_periods(station, now).await {
                match result {
                    Ok(reading) => {
                        stored += 1;
                        tracing::debug!("  {} {}: {} mm", station.name, period, reading.amount_mm);
                    }
                    Err(e) => {
                        failed += 1;
                        tracing::warn!("  {} {}: {}", station.name, period, e);
                    }
                }
            }
            match self.fetcher.store_day_total(station, today).await {
                Ok(total) => {
                    stored += 1;
                    tracing::debug!("  {} today: {} mm", station.name, total);
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!("  {} today: {}", station.name, e);
                }
            }
        }

        if stored > 0 {
            self.fetcher.mark_api_success(now).await;
        }
        if stored == 0 {
            return Err(AppError::ProviderUnavailable(format!(
                "all {} fetches failed",
                failed
            )));
        }
        Ok(format!(
            "{} stations, {} values stored, {} failed",
            stations.len(),
            stored,
            failed
        ))
    }

    /// Store yesterday's final total and run the live aggregation policy.
    pub async fn daily_job(&self) -> Result<String, AppError> {
        let stations = self.store.list_stations().await?;
        if stations.is_empty() {
            return Ok("no stations".to_string());
        }

        let today = Utc::now().date_naive();
        let yesterday = today - Duration::days(1);
        let mut failures = Vec::new();

        for station in &stations {
            match self.fetcher.store_day_total(station, yesterday).await {
                Ok(total) => tracing::info!("  {} {}: {} mm", station.name, yesterday, total),
                Err(e) => {
                    tracing::warn!("  {} {}: {}", station.name, yesterday, e);
                    failures.push(format!("station {} day {}: {}", station.id, yesterday, e));
                }
            }
            match self.engine.run_live(station.id, today).await {
                Ok(summary) => tracing::info!(
                    "  {} month {} = {} mm, year {} = {} mm",
                    station.name,
                    summary.month,
                    summary.month_total_mm,
                    summary.year,
                    summary.year_total_mm
                ),
                Err(e) => {
                    tracing::error!("  {} aggregation: {}", station.name, e);
                    failures.push(format!("station {} aggregation: {}", station.id, e));
                }
            }
        }

        self.store
            .set_status_marker(MARKER_LAST_AGGREGATES_CALCULATION, &instant_key(Utc::now()))
            .await?;

        if failures.is_empty() {
            Ok(format!("{} stations aggregated", stations.len()))
        } else {
            Err(AppError::InternalError(failures.join("; ")))
        }
    }
}
