pub mod admin;
pub mod health;
pub mod rainfall;
pub mod stations;
pub mod system;

use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

use crate::db::Store;
use crate::services::fetcher::FallbackFetcher;
use crate::services::provider::MeasurementProvider;
use crate::services::reports::Reports;
use crate::services::stations::StationDirectory;
use crate::services::token::TokenManager;

use admin::AdminCredentials;

/// Shared application state for the API and admin endpoints.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn MeasurementProvider>,
    pub tokens: TokenManager,
    pub fetcher: FallbackFetcher,
    pub stations: StationDirectory,
    pub reports: Reports,
    pub admin: AdminCredentials,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn MeasurementProvider>,
        tokens: TokenManager,
        admin: AdminCredentials,
    ) -> Self {
        Self {
            fetcher: FallbackFetcher::new(store.clone(), provider.clone(), tokens.clone()),
            stations: StationDirectory::new(store.clone(), provider.clone(), tokens.clone()),
            reports: Reports::new(store, tokens.clone()),
            provider,
            tokens,
            admin,
        }
    }
}

/// Plain acknowledgement body.
#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::models::TokenState;
    use crate::services::mock::ScriptedProvider;
    use chrono::{Duration, Utc};

    /// App state over an in-memory store holding a valid token pair.
    pub(crate) async fn test_state() -> (AppState, Arc<MemoryStore>, Arc<ScriptedProvider>) {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(ScriptedProvider::new());
        let now = Utc::now();
        store
            .save_token_state(&TokenState {
                access_token: "stored-access".to_string(),
                refresh_token: "stored-refresh".to_string(),
                expires_at: now + Duration::hours(2),
                updated_at: now,
            })
            .await
            .unwrap();
        let tokens = TokenManager::new(store.clone(), provider.clone(), None);
        let admin = AdminCredentials {
            username: "admin".to_string(),
            password: "secret".to_string(),
        };
        let state = AppState::new(store.clone(), provider.clone(), tokens, admin);
        (state, store, provider)
    }
}
