// Rainfall API v0.1
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::Method;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use rainfall_api::config::AppConfig;
use rainfall_api::db::queries::PgStore;
use rainfall_api::db::Store;
use rainfall_api::errors::{self, AppError};
use rainfall_api::routes::{self, admin::AdminCredentials, AppState};
use rainfall_api::services::aggregation::AggregationEngine;
use rainfall_api::services::netatmo::NetatmoClient;
use rainfall_api::services::provider::MeasurementProvider;
use rainfall_api::services::scheduler::{Scheduler, SchedulerState, SharedSchedulerState};
use rainfall_api::services::token::TokenManager;
use rainfall_api::services::{fetcher, reports, scheduler, token};

/// Rainfall API OpenAPI document.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Rainfall API",
        version = "0.1.0",
        description = "Rain gauge service for Netatmo stations. Polls rainfall \
            measurements, caches them per period, rolls daily totals up into \
            monthly and yearly totals, and serves live values with a cache fallback.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Stations", description = "Rain gauge discovery"),
        (name = "Rainfall", description = "Current and historical rainfall"),
        (name = "System", description = "Token, marker and scheduler status"),
        (name = "Admin", description = "Basic-auth protected administration"),
    ),
    paths(
        routes::health::health_check,
        routes::stations::list_stations,
        routes::stations::refresh_stations,
        routes::rainfall::get_current,
        routes::rainfall::get_historical,
        routes::rainfall::update_cache,
        routes::system::get_system_status,
        routes::system::get_scheduler_status,
        routes::admin::get_admin_status,
        routes::admin::update_tokens,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::stations::StationsRefreshResponse,
            routes::rainfall::UpdateCacheRequest,
            routes::admin::UpdateTokensRequest,
            routes::MessageResponse,
            rainfall_api::db::models::Station,
            rainfall_api::db::models::MeasurementRecord,
            rainfall_api::db::models::PeriodType,
            rainfall_api::db::models::StatusMarker,
            fetcher::CurrentRainfall,
            fetcher::PeriodReading,
            fetcher::Source,
            reports::StationHistory,
            reports::SystemStatus,
            reports::AdminStatus,
            token::TokenStatus,
            scheduler::SchedulerState,
            scheduler::JobStatus,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    rainfall_api::init_tracing("rainfall_api=debug,tower_http=debug");

    if let Err(e) = run().await {
        tracing::error!("Fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let config = AppConfig::from_env()?;

    let store: Arc<dyn Store> = Arc::new(PgStore::connect(&config.database_url).await?);
    let provider: Arc<dyn MeasurementProvider> = Arc::new(NetatmoClient::new(&config.netatmo)?);

    let tokens = TokenManager::new(store.clone(), provider.clone(), config.seed_tokens.clone());
    if let Err(e) = tokens.initialize().await {
        // The service still serves cached data; tokens can be set via POST /admin/tokens.
        tracing::warn!("Tokens not initialized: {}", e);
    }

    let app_state = AppState::new(
        store.clone(),
        provider,
        tokens.clone(),
        AdminCredentials {
            username: config.admin_username.clone(),
            password: config.admin_password.clone(),
        },
    );

    // Background jobs
    let scheduler_state: SharedSchedulerState = Arc::new(RwLock::new(SchedulerState::new()));
    Scheduler::new(
        store.clone(),
        tokens,
        app_state.fetcher.clone(),
        AggregationEngine::new(store.clone()),
        scheduler_state.clone(),
    )
    .start()
    .await;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/api/stations", get(routes::stations::list_stations))
        .route("/api/stations/refresh", post(routes::stations::refresh_stations))
        .route(
            "/api/rainfall/current/:station_id",
            get(routes::rainfall::get_current),
        )
        .route("/api/rainfall/historical", get(routes::rainfall::get_historical))
        .route("/api/rainfall/update-cache", post(routes::rainfall::update_cache))
        .route("/api/system/status", get(routes::system::get_system_status))
        .with_state(app_state.clone());

    let admin_routes = Router::new()
        .route("/admin/status", get(routes::admin::get_admin_status))
        .route("/admin/tokens", post(routes::admin::update_tokens))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            routes::admin::require_admin,
        ))
        .with_state(app_state);

    // Health check pings the store directly
    let health_routes = Router::new()
        .route("/api/health", get(routes::health::health_check))
        .with_state(store);

    let scheduler_routes = Router::new()
        .route(
            "/api/system/scheduler",
            get(routes::system::get_scheduler_status),
        )
        .with_state(scheduler_state);

    let app = Router::new()
        .merge(health_routes)
        .merge(api_routes)
        .merge(admin_routes)
        .merge(scheduler_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::InternalError(format!("Server terminated unexpectedly: {}", e)))
}
