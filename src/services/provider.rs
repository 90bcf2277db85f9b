//! Measurement provider capability.
//!
//! The core never talks HTTP directly; it goes through [`MeasurementProvider`].
//! [`crate::services::netatmo::NetatmoClient`] is the production
//! implementation. A provider must report an expired access token as
//! [`AppError::TokenExpired`] so the token manager can refresh and retry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::models::{NewStation, PeriodType};
use crate::errors::AppError;

/// Sampling scale accepted by the provider's measure endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Resolution {
    #[serde(rename = "5min")]
    FiveMinutes,
    #[serde(rename = "30min")]
    ThirtyMinutes,
    #[serde(rename = "1hour")]
    OneHour,
    #[serde(rename = "3hours")]
    ThreeHours,
    #[serde(rename = "1day")]
    OneDay,
    #[serde(rename = "1week")]
    OneWeek,
    #[serde(rename = "1month")]
    OneMonth,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::FiveMinutes => "5min",
            Resolution::ThirtyMinutes => "30min",
            Resolution::OneHour => "1hour",
            Resolution::ThreeHours => "3hours",
            Resolution::OneDay => "1day",
            Resolution::OneWeek => "1week",
            Resolution::OneMonth => "1month",
        }
    }

    /// Native scale for a sub-day period; calendar periods are fetched at 5 minutes.
    pub fn native_for(period: PeriodType) -> Self {
        match period {
            PeriodType::ThirtyMinutes => Resolution::ThirtyMinutes,
            PeriodType::OneHour => Resolution::OneHour,
            PeriodType::ThreeHours => Resolution::ThreeHours,
            PeriodType::Day | PeriodType::Month | PeriodType::Year => Resolution::FiveMinutes,
        }
    }
}

/// Result of a refresh-token exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in_secs: i64,
}

/// Parameters for a measure request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasureQuery {
    pub device_id: String,
    pub module_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub resolution: Resolution,
}

/// One rain gauge sample. Missing samples are simply absent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[async_trait]
pub trait MeasurementProvider: Send + Sync {
    /// Trade a refresh token for a new access/refresh pair.
    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, AppError>;

    /// Rain gauge modules visible to the account.
    async fn list_stations(&self, access_token: &str) -> Result<Vec<NewStation>, AppError>;

    async fn get_measurements(
        &self,
        access_token: &str,
        query: &MeasureQuery,
    ) -> Result<Vec<Sample>, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_resolution_for_short_periods() {
        assert_eq!(
            Resolution::native_for(PeriodType::ThirtyMinutes),
            Resolution::ThirtyMinutes
        );
        assert_eq!(Resolution::native_for(PeriodType::OneHour), Resolution::OneHour);
        assert_eq!(
            Resolution::native_for(PeriodType::ThreeHours),
            Resolution::ThreeHours
        );
        assert_eq!(Resolution::native_for(PeriodType::Day), Resolution::FiveMinutes);
    }

    #[test]
    fn test_resolution_labels() {
        assert_eq!(Resolution::FiveMinutes.as_str(), "5min");
        assert_eq!(Resolution::OneDay.as_str(), "1day");
        assert_eq!(
            serde_json::to_string(&Resolution::OneMonth).unwrap(),
            "\"1month\""
        );
    }
}
