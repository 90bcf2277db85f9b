//! Rain gauge discovery and registration.

use std::sync::Arc;

use crate::db::models::Station;
use crate::db::Store;
use crate::errors::AppError;
use crate::services::provider::MeasurementProvider;
use crate::services::token::TokenManager;

#[derive(Clone)]
pub struct StationDirectory {
    store: Arc<dyn Store>,
    provider: Arc<dyn MeasurementProvider>,
    tokens: TokenManager,
}

impl StationDirectory {
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

    /// Stored stations; discovered from the provider on first use.
    pub async fn list_or_discover(&self) -> Result<Vec<Station>, AppError> {
        let stations = self.store.list_stations().await?;
        if !stations.is_empty() {
            return Ok(stations);
        }
        tracing::info!("No stations stored yet, discovering from Netatmo");
        self.refresh().await
    }

    /// Discover rain gauges and register any new ones. Known stations are
    /// left as they are.
    pub async fn refresh(&self) -> Result<Vec<Station>, AppError> {
        let discovered = self
            .tokens
            .with_access_token(|token| {
                let provider = Arc::clone(&self.provider);
                async move { provider.list_stations(&token).await }
            })
            .await?;

        for station in &discovered {
            let stored = self.store.register_station(station).await?;
            tracing::debug!(
                "Station {} registered ({} / {})",
                stored.id,
                stored.device_id,
                stored.module_id
            );
        }

        let stations = self.store.list_stations().await?;
        tracing::info!(
            "Discovered {} rain gauges, {} stations stored",
            discovered.len(),
            stations.len()
        );
        Ok(stations)
    }
}
