//! Shared helpers for period keys and rainfall sums.
//!
//! All calendar keys are computed in UTC:
//!
//! - `instant_key`: RFC 3339 timestamp with millisecond precision (sub-day periods)
//! - `day_key`: `YYYY-MM-DD`
//! - `month_key`: `YYYY-MM`
//! - `year_key`: `YYYY`
//!
//! Fixed-width keys sort lexicographically in time order, which is what the
//! store relies on for "newest first".

use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, Utc};

/// Key for a live sub-day poll taken at `at`.
pub(crate) fn instant_key(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

pub(crate) fn year_key(year: i32) -> String {
    format!("{:04}", year)
}

/// Midnight UTC at the start of `date`.
pub(crate) fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or_default()
}

/// First day of the month preceding the month of `date`.
pub(crate) fn first_of_previous_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 1 {
        (date.year() - 1, 12)
    } else {
        (date.year(), date.month() - 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(date)
}

/// Sum millimetre values, skipping non-finite entries.
///
/// Plain floating addition, no rounding: display rounding belongs to clients.
pub(crate) fn sum_mm<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    values.into_iter().fold(0.0, |acc, v| {
        if v.is_finite() {
            acc + v
        } else {
            tracing::warn!("sum_mm received non-finite value {}, ignoring", v);
            acc
        }
    })
}
