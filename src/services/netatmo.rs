//! Netatmo Weather API client.
//!
//! Implements [`MeasurementProvider`] over the three endpoints the service
//! needs: OAuth2 refresh, station discovery and rain measurements.
//! See: https://dev.netatmo.com/apidocumentation/weather

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::NetatmoConfig;
use crate::db::models::NewStation;
use crate::errors::AppError;
use crate::services::provider::{MeasureQuery, MeasurementProvider, Sample, TokenGrant};

/// Netatmo module type of the rain gauge.
const RAIN_GAUGE_MODULE_TYPE: &str = "NAModule3";

/// Token lifetime assumed when the token endpoint omits `expires_in` (seconds).
const DEFAULT_TOKEN_TTL_SECS: i64 = 10_800;

/// Client for the Netatmo Weather API.
#[derive(Debug, Clone)]
pub struct NetatmoClient {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

// --- Netatmo JSON response types ---

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StationsResponse {
    body: Option<StationsBody>,
}

#[derive(Debug, Deserialize)]
struct StationsBody {
    #[serde(default)]
    devices: Vec<NetatmoDevice>,
}

#[derive(Debug, Deserialize)]
struct NetatmoDevice {
    #[serde(rename = "_id")]
    id: String,
    station_name: Option<String>,
    place: Option<NetatmoPlace>,
    #[serde(default)]
    modules: Vec<NetatmoModule>,
}

#[derive(Debug, Deserialize)]
struct NetatmoPlace {
    city: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NetatmoModule {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "type")]
    module_type: String,
    module_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MeasureResponse {
    body: Option<serde_json::Value>,
}

impl NetatmoClient {
    pub fn new(config: &NetatmoConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl MeasurementProvider for NetatmoClient {
    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, AppError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self
            .client
            .post(self.url("/oauth2/token"))
            .form(&params)
            .send()
            .await
            .map_err(|e| AppError::AuthError(format!("Token refresh request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::AuthError(format!(
                "Token refresh failed: {} - {}",
                status, body
            )));
        }

        let data: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::AuthError(format!("Token response parse error: {}", e)))?;

        Ok(TokenGrant {
            access_token: data.access_token,
            refresh_token: data.refresh_token,
            expires_in_secs: data.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS),
        })
    }

    async fn list_stations(&self, access_token: &str) -> Result<Vec<NewStation>, AppError> {
        let response = self
            .client
            .get(self.url("/api/getstationsdata"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| {
                AppError::ProviderUnavailable(format!("Netatmo request failed: {}", e))
            })?;

        let response = check_status(response, "Get stations").await?;
        let data: StationsResponse = response.json().await.map_err(|e| {
            AppError::ProviderUnavailable(format!("Netatmo JSON parse error: {}", e))
        })?;

        Ok(extract_rain_gauges(data))
    }

    async fn get_measurements(
        &self,
        access_token: &str,
        query: &MeasureQuery,
    ) -> Result<Vec<Sample>, AppError> {
        let params = [
            ("device_id", query.device_id.clone()),
            ("module_id", query.module_id.clone()),
            ("scale", query.resolution.as_str().to_string()),
            ("type", "Rain".to_string()),
            ("date_begin", query.start.timestamp().to_string()),
            ("date_end", query.end.timestamp().to_string()),
            ("optimize", "false".to_string()),
        ];

        let response = self
            .client
            .get(self.url("/api/getmeasure"))
            .bearer_auth(access_token)
            .query(&params)
            .send()
            .await
            .map_err(|e| {
                AppError::ProviderUnavailable(format!("Netatmo request failed: {}", e))
            })?;

        let response = check_status(response, "Get measure").await?;
        let data: MeasureResponse = response.json().await.map_err(|e| {
            AppError::ProviderUnavailable(format!("Netatmo JSON parse error: {}", e))
        })?;

        Ok(data.body.as_ref().map(parse_measure_body).unwrap_or_default())
    }
}

/// Map non-2xx answers: 401 is the expired-token signal, everything else is
/// an unavailable provider.
async fn check_status(
    response: reqwest::Response,
    context: &str,
) -> Result<reqwest::Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(AppError::TokenExpired);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::ProviderUnavailable(format!(
        "{} failed: {} - {}",
        context, status, body
    )))
}

/// Flatten devices into one entry per rain gauge module.
fn extract_rain_gauges(data: StationsResponse) -> Vec<NewStation> {
    let devices = data.body.map(|b| b.devices).unwrap_or_default();
    let mut stations = Vec::new();
    for device in devices {
        let location = device
            .place
            .as_ref()
            .and_then(|p| p.city.clone())
            .unwrap_or_else(|| "Unknown".to_string());
        for module in device
            .modules
            .iter()
            .filter(|m| m.module_type == RAIN_GAUGE_MODULE_TYPE)
        {
            let name = module
                .module_name
                .clone()
                .or_else(|| device.station_name.clone())
                .unwrap_or_else(|| "Rain gauge".to_string());
            stations.push(NewStation {
                device_id: device.id.clone(),
                module_id: module.id.clone(),
                name,
                location: location.clone(),
            });
        }
    }
    stations
}

/// Parse a getmeasure body into samples, oldest first.
///
/// With `optimize=false` the body is `{ "<unix ts>": [value], ... }`. The
/// optimized array form (`[{ beg_time, step_time, value: [[v], ...] }]`) is
/// accepted too. Null values are dropped.
fn parse_measure_body(body: &serde_json::Value) -> Vec<Sample> {
    let mut samples = Vec::new();

    if let Ok(map) = serde_json::from_value::<HashMap<String, Vec<Option<f64>>>>(body.clone()) {
        for (ts, values) in map {
            let Ok(secs) = ts.parse::<i64>() else {
                tracing::warn!("Skipping measure entry with invalid timestamp '{}'", ts);
                continue;
            };
            if let (Some(Some(value)), Some(timestamp)) =
                (values.first(), DateTime::<Utc>::from_timestamp(secs, 0))
            {
                samples.push(Sample {
                    timestamp,
                    value: *value,
                });
            }
        }
    } else if let Some(chunks) = body.as_array() {
        for chunk in chunks {
            let beg = chunk.get("beg_time").and_then(|v| v.as_i64());
            let step = chunk.get("step_time").and_then(|v| v.as_i64()).unwrap_or(0);
            let values = chunk.get("value").and_then(|v| v.as_array());
            let (Some(beg), Some(values)) = (beg, values) else {
                continue;
            };
            for (i, entry) in values.iter().enumerate() {
                let value = entry.get(0).and_then(|v| v.as_f64());
                let timestamp = DateTime::<Utc>::from_timestamp(beg + step * i as i64, 0);
                if let (Some(value), Some(timestamp)) = (value, timestamp) {
                    samples.push(Sample { timestamp, value });
                }
            }
        }
    }

    samples.sort_by_key(|s| s.timestamp);
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::provider::Resolution;
    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> NetatmoClient {
        NetatmoClient::new(&NetatmoConfig {
            base_url: server.uri(),
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn query() -> MeasureQuery {
        MeasureQuery {
            device_id: "70:ee:50:00:00:01".to_string(),
            module_id: "05:00:00:00:00:02".to_string(),
            start: "2024-06-03T00:00:00Z".parse().unwrap(),
            end: "2024-06-03T10:00:00Z".parse().unwrap(),
            resolution: Resolution::FiveMinutes,
        }
    }

    #[tokio::test]
    async fn test_exchange_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=old-refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-access",
                "refresh_token": "new-refresh",
                "expires_in": 10800
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = client_for(&server)
            .exchange_refresh_token("old-refresh")
            .await
            .unwrap();
        assert_eq!(grant.access_token, "new-access");
        assert_eq!(grant.refresh_token, "new-refresh");
        assert_eq!(grant.expires_in_secs, 10800);
    }

    #[tokio::test]
    async fn test_exchange_defaults_ttl() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "a",
                "refresh_token": "r"
            })))
            .mount(&server)
            .await;

        let grant = client_for(&server).exchange_refresh_token("x").await.unwrap();
        assert_eq!(grant.expires_in_secs, DEFAULT_TOKEN_TTL_SECS);
    }

    #[tokio::test]
    async fn test_exchange_rejected_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .exchange_refresh_token("revoked")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AuthError(msg) if msg.contains("invalid_grant")));
    }

    #[tokio::test]
    async fn test_list_stations_keeps_only_rain_gauges() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/getstationsdata"))
            .and(header("authorization", "Bearer access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "body": {
                    "devices": [{
                        "_id": "70:ee:50:00:00:01",
                        "station_name": "Home",
                        "place": { "city": "Zurich" },
                        "modules": [
                            { "_id": "02:00:00:00:00:01", "type": "NAModule1", "module_name": "Outdoor" },
                            { "_id": "05:00:00:00:00:02", "type": "NAModule3", "module_name": "Rain" },
                            { "_id": "05:00:00:00:00:03", "type": "NAModule3" }
                        ]
                    }, {
                        "_id": "70:ee:50:00:00:09",
                        "modules": []
                    }]
                }
            })))
            .mount(&server)
            .await;

        let stations = client_for(&server).list_stations("access").await.unwrap();
        assert_eq!(stations.len(), 2);
        assert_eq!(stations[0].name, "Rain");
        assert_eq!(stations[0].location, "Zurich");
        assert_eq!(stations[1].name, "Home", "Falls back to the station name");
    }

    #[tokio::test]
    async fn test_unauthorized_is_token_expired_signal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/getmeasure"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = client_for(&server).get_measurements("stale", &query()).await;
        assert!(matches!(assert_err!(result), AppError::TokenExpired));
    }

    #[tokio::test]
    async fn test_server_error_is_provider_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/getstationsdata"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = client_for(&server).list_stations("access").await;
        assert!(matches!(
            assert_err!(result),
            AppError::ProviderUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_get_measurements_sends_query_and_skips_nulls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/getmeasure"))
            .and(query_param("scale", "5min"))
            .and(query_param("type", "Rain"))
            .and(query_param("date_begin", "1717372800"))
            .and(query_param("date_end", "1717408800"))
            .and(query_param("module_id", "05:00:00:00:00:02"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "body": {
                    "1717380000": [0.303],
                    "1717380300": [null],
                    "1717380600": [0.101]
                },
                "status": "ok"
            })))
            .mount(&server)
            .await;

        let samples = assert_ok!(client_for(&server).get_measurements("access", &query()).await);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].value, 0.303);
        assert!(samples[0].timestamp < samples[1].timestamp);
    }

    #[tokio::test]
    async fn test_get_measurements_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/getmeasure"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "body": [] })),
            )
            .mount(&server)
            .await;

        let samples = client_for(&server)
            .get_measurements("access", &query())
            .await
            .unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn test_parse_measure_body_optimized_form() {
        let body = serde_json::json!([
            { "beg_time": 1717380000, "step_time": 300, "value": [[0.1], [0.2], [null]] }
        ]);
        let samples = parse_measure_body(&body);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].timestamp.timestamp(), 1717380300);
        assert_eq!(samples[1].value, 0.2);
    }
}
