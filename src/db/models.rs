use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// A registered rain gauge. Never mutated after registration.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, ToSchema)]
pub struct Station {
    pub id: i64,
    /// Netatmo base station MAC address
    pub device_id: String,
    /// Rain gauge module MAC address
    pub module_id: String,
    pub name: String,
    pub location: String,
    pub created_at: DateTime<Utc>,
}

/// A station as reported by the provider, before registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStation {
    pub device_id: String,
    pub module_id: String,
    pub name: String,
    pub location: String,
}

/// Granularity bucket of a stored rainfall total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub enum PeriodType {
    #[serde(rename = "30min")]
    ThirtyMinutes,
    #[serde(rename = "1hour")]
    OneHour,
    #[serde(rename = "3hours")]
    ThreeHours,
    #[serde(rename = "day")]
    Day,
    #[serde(rename = "month")]
    Month,
    #[serde(rename = "year")]
    Year,
}

/// Sub-day windows refreshed by the live read path and the hourly job.
pub const SHORT_PERIODS: [PeriodType; 3] = [
    PeriodType::ThirtyMinutes,
    PeriodType::OneHour,
    PeriodType::ThreeHours,
];

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::ThirtyMinutes => "30min",
            PeriodType::OneHour => "1hour",
            PeriodType::ThreeHours => "3hours",
            PeriodType::Day => "day",
            PeriodType::Month => "month",
            PeriodType::Year => "year",
        }
    }

    /// Trailing window length for sub-day periods; `None` for calendar periods.
    pub fn window(&self) -> Option<Duration> {
        match self {
            PeriodType::ThirtyMinutes => Some(Duration::minutes(30)),
            PeriodType::OneHour => Some(Duration::hours(1)),
            PeriodType::ThreeHours => Some(Duration::hours(3)),
            PeriodType::Day | PeriodType::Month | PeriodType::Year => None,
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown period type '{0}'")]
pub struct UnknownPeriodType(pub String);

impl FromStr for PeriodType {
    type Err = UnknownPeriodType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "30min" => Ok(PeriodType::ThirtyMinutes),
            "1hour" => Ok(PeriodType::OneHour),
            "3hours" => Ok(PeriodType::ThreeHours),
            "day" => Ok(PeriodType::Day),
            "month" => Ok(PeriodType::Month),
            "year" => Ok(PeriodType::Year),
            other => Err(UnknownPeriodType(other.to_string())),
        }
    }
}

impl TryFrom<String> for PeriodType {
    type Error = UnknownPeriodType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One period-keyed rainfall total.
/// `(station_id, period_type, period_value)` is unique; writes are upserts.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, ToSchema)]
pub struct MeasurementRecord {
    pub station_id: i64,
    #[sqlx(try_from = "String")]
    pub period_type: PeriodType,
    /// ISO timestamp, `YYYY-MM-DD`, `YYYY-MM` or `YYYY` depending on `period_type`
    pub period_value: String,
    pub amount_mm: f64,
    pub created_at: DateTime<Utc>,
}

/// The singleton OAuth2 token row.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct TokenState {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Named observability timestamp.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, ToSchema)]
pub struct StatusMarker {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

pub const MARKER_LAST_TOKEN_REFRESH: &str = "last_token_refresh";
pub const MARKER_LAST_AGGREGATES_CALCULATION: &str = "last_aggregates_calculation";
pub const MARKER_LAST_API_SUCCESS: &str = "last_api_success";
