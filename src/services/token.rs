//! OAuth2 token lifecycle.
//!
//! [`TokenManager`] owns the only in-memory copy of the token pair; the store
//! is a write-through mirror used to survive restarts.
//!
//! Freshness states:
//! - uninitialized: nothing loaded yet (loaded lazily on first use)
//! - valid: more than [`REFRESH_MARGIN_SECS`] left
//! - expiring soon: inside the margin, the next `get_access_token` refreshes
//! - refreshing: one exchange in flight, every caller attaches to it
//!
//! The refresh is single-flight: concurrent callers share one provider
//! exchange and all observe the same result. Netatmo invalidates a refresh
//! token once it has been used, so duplicate exchanges would lock us out.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use utoipa::ToSchema;

use crate::config::SeedTokens;
use crate::db::models::{TokenState, MARKER_LAST_TOKEN_REFRESH};
use crate::db::Store;
use crate::errors::AppError;
use crate::helpers::instant_key;
use crate::services::provider::MeasurementProvider;

/// Refresh when fewer than this many seconds of validity remain.
pub const REFRESH_MARGIN_SECS: i64 = 300;

/// Lifetime assumed for seeded or manually entered tokens (3 hours).
const ASSUMED_TOKEN_TTL_SECS: i64 = 10_800;

type RefreshFlight = Shared<BoxFuture<'static, Result<TokenState, AppError>>>;

/// Read-only view of the current token, as reported by the status endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TokenStatus {
    pub initialized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_expired: Option<bool>,
}

impl TokenStatus {
    pub fn at(tokens: Option<&TokenState>, now: DateTime<Utc>) -> Self {
        match tokens {
            None => Self {
                initialized: false,
                expires_at: None,
                expires_in_seconds: None,
                is_expired: None,
            },
            Some(t) => {
                let expires_in = (t.expires_at - now).num_seconds();
                Self {
                    initialized: true,
                    expires_at: Some(t.expires_at),
                    expires_in_seconds: Some(expires_in),
                    is_expired: Some(expires_in <= 0),
                }
            }
        }
    }
}

/// Cheap-to-clone handle; all clones share one token state.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn Store>,
    provider: Arc<dyn MeasurementProvider>,
    seed: Option<SeedTokens>,
    tokens: RwLock<Option<TokenState>>,
    in_flight: Mutex<Option<RefreshFlight>>,
}

impl TokenManager {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn MeasurementProvider>,
        seed: Option<SeedTokens>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                provider,
                seed,
                tokens: RwLock::new(None),
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Load the token pair from the store, seeding it from configuration when
    /// the store has none.
    pub async fn initialize(&self) -> Result<TokenState, AppError> {
        self.inner.initialize().await
    }

    /// Current access token, refreshed first when it is about to expire.
    pub async fn get_access_token(&self) -> Result<String, AppError> {
        let tokens = self.inner.current().await?;
        let remaining = tokens.expires_at - Utc::now();
        if remaining < Duration::seconds(REFRESH_MARGIN_SECS) {
            tracing::info!(
                "Access token expires in {}s, refreshing before use",
                remaining.num_seconds()
            );
            return Ok(self.refresh().await?.access_token);
        }
        Ok(tokens.access_token)
    }

    /// Exchange the refresh token for a new pair.
    ///
    /// Joins the refresh already in flight if there is one. The exchange runs
    /// in its own task, so it completes even if every caller goes away.
    pub async fn refresh(&self) -> Result<TokenState, AppError> {
        let flight = {
            let mut slot = self.inner.in_flight.lock().await;
            match slot.as_ref() {
                Some(existing) => {
                    tracing::debug!("Token refresh already in flight, attaching");
                    existing.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let task = tokio::spawn(async move {
                        let result = inner.exchange().await;
                        inner.in_flight.lock().await.take();
                        result
                    });
                    let flight = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(AppError::InternalError(format!(
                                "Token refresh task failed: {}",
                                e
                            )))
                        })
                    }
                    .boxed()
                    .shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    /// Replace the token pair with manually supplied values.
    pub async fn update_tokens(&self, access_token: &str, refresh_token: &str) -> Result<(), AppError> {
        // Let a running exchange land first so it cannot overwrite these values.
        let pending = self.inner.in_flight.lock().await.clone();
        if let Some(flight) = pending {
            let _ = flight.await;
        }

        let now = Utc::now();
        let state = TokenState {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_at: now + Duration::seconds(ASSUMED_TOKEN_TTL_SECS),
            updated_at: now,
        };
        let mut tokens = self.inner.tokens.write().await;
        self.inner.store.save_token_state(&state).await?;
        *tokens = Some(state);
        drop(tokens);

        self.inner.mark_refreshed(now).await;
        tracing::info!("Tokens updated manually");
        Ok(())
    }

    /// Derived token status. Never triggers a refresh.
    pub async fn status(&self) -> TokenStatus {
        let tokens = self.inner.tokens.read().await;
        TokenStatus::at(tokens.as_ref(), Utc::now())
    }

    /// Run a provider call with a valid access token.
    ///
    /// If the provider answers with [`AppError::TokenExpired`], the token is
    /// refreshed and the call is retried exactly once.
    pub async fn with_access_token<T, F, Fut>(&self, mut call: F) -> Result<T, AppError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let token = self.get_access_token().await?;
        match call(token).await {
            Err(AppError::TokenExpired) => {
                tracing::warn!("Provider rejected the access token, refreshing and retrying once");
                let refreshed = self.refresh().await?;
                call(refreshed.access_token).await
            }
            other => other,
        }
    }
}

impl Inner {
    async fn current(&self) -> Result<TokenState, AppError> {
        if let Some(tokens) = self.tokens.read().await.as_ref() {
            return Ok(tokens.clone());
        }
        self.initialize().await
    }

    async fn initialize(&self) -> Result<TokenState, AppError> {
        // Hold the write lock across the load so concurrent first users
        // cannot seed twice.
        let mut slot = self.tokens.write().await;
        if let Some(tokens) = slot.as_ref() {
            return Ok(tokens.clone());
        }

        if let Some(stored) = self.store.get_token_state().await? {
            tracing::info!("Tokens loaded from database (expire at {})", stored.expires_at);
            *slot = Some(stored.clone());
            return Ok(stored);
        }

        let seed = self.seed.as_ref().ok_or_else(|| {
            AppError::ConfigError(
                "No stored tokens and NETATMO_ACCESS_TOKEN / NETATMO_REFRESH_TOKEN are not set"
                    .to_string(),
            )
        })?;
        let now = Utc::now();
        let seeded = TokenState {
            access_token: seed.access_token.clone(),
            refresh_token: seed.refresh_token.clone(),
            expires_at: now + Duration::seconds(ASSUMED_TOKEN_TTL_SECS),
            updated_at: now,
        };
        self.store.save_token_state(&seeded).await?;
        tracing::info!("Tokens initialized from environment");
        *slot = Some(seeded.clone());
        Ok(seeded)
    }

    /// The single provider exchange behind a refresh flight.
    async fn exchange(&self) -> Result<TokenState, AppError> {
        let current = self.current().await?;
        tracing::info!("Refreshing tokens");

        let grant = self
            .provider
            .exchange_refresh_token(&current.refresh_token)
            .await
            .map_err(|e| {
                tracing::error!("Token refresh failed: {}", e);
                match e {
                    AppError::AuthError(_) => e,
                    other => AppError::AuthError(other.to_string()),
                }
            })?;

        let now = Utc::now();
        let next = TokenState {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: now + Duration::seconds(grant.expires_in_secs),
            updated_at: now,
        };

        // The old refresh token is spent at this point, so the new pair is
        // adopted even if the store write fails.
        let mut tokens = self.tokens.write().await;
        if let Err(e) = self.store.save_token_state(&next).await {
            tracing::error!("Refreshed tokens could not be persisted: {}", e);
        }
        *tokens = Some(next.clone());
        drop(tokens);

        self.mark_refreshed(now).await;
        tracing::info!("Tokens refreshed, valid until {}", next.expires_at);
        Ok(next)
    }

    async fn mark_refreshed(&self, at: DateTime<Utc>) {
        if let Err(e) = self
            .store
            .set_status_marker(MARKER_LAST_TOKEN_REFRESH, &instant_key(at))
            .await
        {
            tracing::warn!("Failed to update {} marker: {}", MARKER_LAST_TOKEN_REFRESH, e);
        }
    }
}
