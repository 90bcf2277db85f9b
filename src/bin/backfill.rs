//! Historical backfill of daily rainfall totals.
//!
//! Fetches every missing day for every station (five years by default,
//! `BACKFILL_DAYS=N` for the last N days), then builds the monthly and yearly
//! totals. Safe to re-run: days already stored are skipped and finalized
//! months/years are left untouched.

use std::sync::Arc;

use chrono::Utc;

use rainfall_api::config::AppConfig;
use rainfall_api::db::queries::PgStore;
use rainfall_api::db::Store;
use rainfall_api::errors::AppError;
use rainfall_api::services::aggregation::AggregationEngine;
use rainfall_api::services::backfill::{Backfill, BackfillOptions};
use rainfall_api::services::fetcher::FallbackFetcher;
use rainfall_api::services::netatmo::NetatmoClient;
use rainfall_api::services::provider::MeasurementProvider;
use rainfall_api::services::stations::StationDirectory;
use rainfall_api::services::token::TokenManager;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    rainfall_api::init_tracing("rainfall_api=info,backfill=info");

    if let Err(e) = run().await {
        tracing::error!("Backfill failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let config = AppConfig::from_env()?;
    let options = BackfillOptions::from_env()?;
    if let Some(days) = options.days {
        tracing::warn!("BACKFILL_DAYS set: processing only the last {} days", days);
    }

    let store: Arc<dyn Store> = Arc::new(PgStore::connect(&config.database_url).await?);
    let provider: Arc<dyn MeasurementProvider> = Arc::new(NetatmoClient::new(&config.netatmo)?);
    let tokens = TokenManager::new(store.clone(), provider.clone(), config.seed_tokens.clone());
    tokens.initialize().await?;

    let stations = StationDirectory::new(store.clone(), provider.clone(), tokens.clone())
        .list_or_discover()
        .await?;
    if stations.is_empty() {
        return Err(AppError::NotFound(
            "No rain gauge stations found for this account".to_string(),
        ));
    }
    for station in &stations {
        tracing::info!("Station {}: {} ({})", station.id, station.name, station.location);
    }

    let fetcher = FallbackFetcher::new(store.clone(), provider, tokens);
    let backfill = Backfill::new(
        store.clone(),
        fetcher,
        AggregationEngine::new(store),
        options,
    );
    let summary = backfill.run(&stations, Utc::now().date_naive()).await?;

    tracing::info!(
        "Backfill complete: {} days fetched, {} skipped, {} months and {} years written",
        summary.days_fetched,
        summary.days_skipped,
        summary.months_written,
        summary.years_written
    );
    tracing::info!(
        "Stored records: {} days, {} months, {} years",
        summary.day_records,
        summary.month_records,
        summary.year_records
    );
    Ok(())
}
