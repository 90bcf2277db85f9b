use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::models::{MeasurementRecord, NewStation, PeriodType, Station, StatusMarker, TokenState};
use super::Store;
use crate::errors::AppError;

/// List all stations ordered by display name.
pub async fn list_stations(pool: &PgPool) -> Result<Vec<Station>, sqlx::Error> {
    sqlx::query_as::<_, Station>(
        "SELECT id, device_id, module_id, name, location, created_at
         FROM stations ORDER BY name, id",
    )
    .fetch_all(pool)
    .await
}

/// Get a single station by ID.
pub async fn get_station(pool: &PgPool, id: i64) -> Result<Option<Station>, sqlx::Error> {
    sqlx::query_as::<_, Station>(
        "SELECT id, device_id, module_id, name, location, created_at
         FROM stations WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Register a station; existing `(device_id, module_id)` rows are kept as-is.
pub async fn register_station(pool: &PgPool, station: &NewStation) -> Result<Station, sqlx::Error> {
    sqlx::query(
        "INSERT INTO stations (device_id, module_id, name, location)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (device_id, module_id) DO NOTHING",
    )
    .bind(&station.device_id)
    .bind(&station.module_id)
    .bind(&station.name)
    .bind(&station.location)
    .execute(pool)
    .await?;

    sqlx::query_as::<_, Station>(
        "SELECT id, device_id, module_id, name, location, created_at
         FROM stations WHERE device_id = $1 AND module_id = $2",
    )
    .bind(&station.device_id)
    .bind(&station.module_id)
    .fetch_one(pool)
    .await
}

/// Insert or overwrite a rainfall total (last write wins).
pub async fn upsert_rainfall(
    pool: &PgPool,
    station_id: i64,
    period_type: PeriodType,
    period_value: &str,
    amount_mm: f64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO rainfall_data (station_id, period_type, period_value, amount_mm, created_at)
         VALUES ($1, $2, $3, $4, NOW())
         ON CONFLICT (station_id, period_type, period_value)
         DO UPDATE SET amount_mm = EXCLUDED.amount_mm, created_at = NOW()",
    )
    .bind(station_id)
    .bind(period_type.as_str())
    .bind(period_value)
    .bind(amount_mm)
    .execute(pool)
    .await?;
    Ok(())
}

/// Rainfall totals for a station and period type, newest first.
pub async fn get_rainfall(
    pool: &PgPool,
    station_id: i64,
    period_type: PeriodType,
    period_value: Option<&str>,
) -> Result<Vec<MeasurementRecord>, sqlx::Error> {
    sqlx::query_as::<_, MeasurementRecord>(
        "SELECT station_id, period_type, period_value, amount_mm, created_at
         FROM rainfall_data
         WHERE station_id = $1
           AND period_type = $2
           AND ($3::TEXT IS NULL OR period_value = $3)
         ORDER BY period_value DESC",
    )
    .bind(station_id)
    .bind(period_type.as_str())
    .bind(period_value)
    .fetch_all(pool)
    .await
}

/// Rainfall totals whose key starts with `prefix` (e.g. all days of `2024-06`).
pub async fn get_rainfall_with_prefix(
    pool: &PgPool,
    station_id: i64,
    period_type: PeriodType,
    prefix: &str,
) -> Result<Vec<MeasurementRecord>, sqlx::Error> {
    sqlx::query_as::<_, MeasurementRecord>(
        "SELECT station_id, period_type, period_value, amount_mm, created_at
         FROM rainfall_data
         WHERE station_id = $1
           AND period_type = $2
           AND LEFT(period_value, LENGTH($3)) = $3
         ORDER BY period_value DESC",
    )
    .bind(station_id)
    .bind(period_type.as_str())
    .bind(prefix)
    .fetch_all(pool)
    .await
}

/// Most recent rainfall total of a period type (one row).
pub async fn get_latest_rainfall(
    pool: &PgPool,
    station_id: i64,
    period_type: PeriodType,
) -> Result<Option<MeasurementRecord>, sqlx::Error> {
    sqlx::query_as::<_, MeasurementRecord>(
        "SELECT station_id, period_type, period_value, amount_mm, created_at
         FROM rainfall_data
         WHERE station_id = $1 AND period_type = $2
         ORDER BY period_value DESC
         LIMIT 1",
    )
    .bind(station_id)
    .bind(period_type.as_str())
    .fetch_optional(pool)
    .await
}

pub async fn count_rainfall(pool: &PgPool, period_type: PeriodType) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM rainfall_data WHERE period_type = $1")
        .bind(period_type.as_str())
        .fetch_one(pool)
        .await
}

pub async fn get_tokens(pool: &PgPool) -> Result<Option<TokenState>, sqlx::Error> {
    sqlx::query_as::<_, TokenState>(
        "SELECT access_token, refresh_token, expires_at, updated_at FROM tokens WHERE id = 1",
    )
    .fetch_optional(pool)
    .await
}

/// Replace the singleton token row in one statement.
pub async fn save_tokens(pool: &PgPool, tokens: &TokenState) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO tokens (id, access_token, refresh_token, expires_at, updated_at)
         VALUES (1, $1, $2, $3, $4)
         ON CONFLICT (id) DO UPDATE SET
             access_token = EXCLUDED.access_token,
             refresh_token = EXCLUDED.refresh_token,
             expires_at = EXCLUDED.expires_at,
             updated_at = EXCLUDED.updated_at",
    )
    .bind(&tokens.access_token)
    .bind(&tokens.refresh_token)
    .bind(tokens.expires_at)
    .bind(tokens.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_system_status(pool: &PgPool, key: &str, value: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO system_status (key, value, updated_at)
         VALUES ($1, $2, NOW())
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_system_status(
    pool: &PgPool,
    key: &str,
) -> Result<Option<StatusMarker>, sqlx::Error> {
    sqlx::query_as::<_, StatusMarker>(
        "SELECT key, value, updated_at FROM system_status WHERE key = $1",
    )
    .bind(key)
    .fetch_optional(pool)
    .await
}

pub async fn list_system_status(pool: &PgPool) -> Result<Vec<StatusMarker>, sqlx::Error> {
    sqlx::query_as::<_, StatusMarker>(
        "SELECT key, value, updated_at FROM system_status ORDER BY key",
    )
    .fetch_all(pool)
    .await
}

/// Maximum number of connections in the database pool.
const DB_POOL_MAX_CONNECTIONS: u32 = 5;
/// Minimum number of connections kept alive in the database pool.
const DB_POOL_MIN_CONNECTIONS: u32 = 1;

/// PostgreSQL-backed [`Store`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a small connection pool and apply migrations.
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(DB_POOL_MAX_CONNECTIONS)
            .min_connections(DB_POOL_MIN_CONNECTIONS)
            .connect(database_url)
            .await?;
        let store = Self::new(pool);
        store.migrate().await?;
        tracing::info!("Database migrations completed");
        Ok(store)
    }

    /// Apply the embedded migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_token_state(&self) -> Result<Option<TokenState>, AppError> {
        Ok(get_tokens(&self.pool).await?)
    }

    async fn save_token_state(&self, tokens: &TokenState) -> Result<(), AppError> {
        Ok(save_tokens(&self.pool, tokens).await?)
    }

    async fn list_stations(&self) -> Result<Vec<Station>, AppError> {
        Ok(list_stations(&self.pool).await?)
    }

    async fn get_station(&self, id: i64) -> Result<Option<Station>, AppError> {
        Ok(get_station(&self.pool, id).await?)
    }

    async fn register_station(&self, station: &NewStation) -> Result<Station, AppError> {
        Ok(register_station(&self.pool, station).await?)
    }

    async fn upsert_record(
        &self,
        station_id: i64,
        period_type: PeriodType,
        period_value: &str,
        amount_mm: f64,
    ) -> Result<(), AppError> {
        Ok(upsert_rainfall(&self.pool, station_id, period_type, period_value, amount_mm).await?)
    }

    async fn query_records(
        &self,
        station_id: i64,
        period_type: PeriodType,
        period_value: Option<&str>,
    ) -> Result<Vec<MeasurementRecord>, AppError> {
        Ok(get_rainfall(&self.pool, station_id, period_type, period_value).await?)
    }

    async fn query_records_with_prefix(
        &self,
        station_id: i64,
        period_type: PeriodType,
        prefix: &str,
    ) -> Result<Vec<MeasurementRecord>, AppError> {
        Ok(get_rainfall_with_prefix(&self.pool, station_id, period_type, prefix).await?)
    }

    async fn latest_record(
        &self,
        station_id: i64,
        period_type: PeriodType,
    ) -> Result<Option<MeasurementRecord>, AppError> {
        Ok(get_latest_rainfall(&self.pool, station_id, period_type).await?)
    }

    async fn count_records(&self, period_type: PeriodType) -> Result<u64, AppError> {
        let count = count_rainfall(&self.pool, period_type).await?;
        Ok(count.max(0) as u64)
    }

    async fn set_status_marker(&self, key: &str, value: &str) -> Result<(), AppError> {
        Ok(set_system_status(&self.pool, key, value).await?)
    }

    async fn get_status_marker(&self, key: &str) -> Result<Option<StatusMarker>, AppError> {
        Ok(get_system_status(&self.pool, key).await?)
    }

    async fn list_status_markers(&self) -> Result<Vec<StatusMarker>, AppError> {
        Ok(list_system_status(&self.pool).await?)
    }
}

