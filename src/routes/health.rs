use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::Store;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status ("ok" when healthy, "degraded" when DB is unreachable)
    pub status: String,
    /// API version
    pub version: String,
    /// Whether the database is reachable
    pub database: bool,
}

/// Health check endpoint.
///
/// Returns status "degraded" (still 200) if the database is unreachable, so
/// load balancers can distinguish partial failures.
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse),
    )
)]
pub async fn health_check(State(store): State<Arc<dyn Store>>) -> Json<HealthResponse> {
    let db_ok = match store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Health check: database unreachable: {}", e);
            false
        }
    };

    Json(HealthResponse {
        status: if db_ok {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: db_ok,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;

    #[tokio::test]
    async fn test_health_ok_with_reachable_store() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let Json(health) = health_check(State(store)).await;
        assert_eq!(health.status, "ok");
        assert!(health.database);
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }
}
