use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::debug;

use crate::{
    model::{DayRecord, ForecastData},
    provider::{ForecastQuery, ProviderError},
};

use super::WeatherProvider;

const DEFAULT_BASE_URL: &str = "https://api.weatherapi.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// WeatherAPI.com error code for "No matching location found."
const NO_LOCATION_FOUND: i64 = 1006;

/// Largest UTC offset in use (Pacific/Kiritimati, UTC+14).
const MAX_UTC_OFFSET_HOURS: i64 = 14;

#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl WeatherApiProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: String, base_url: impl Into<String>) -> Self {
        Self { api_key, base_url: base_url.into(), http: Client::new() }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        location: &str,
        params: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}/{endpoint}", self.base_url);

        let res = self
            .http
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .query(&[("key", self.api_key.as_str()), ("q", location)])
            .query(params)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = res.status();
        let body = res.text().await.map_err(classify_reqwest)?;

        if !status.is_success() {
            debug!(%status, endpoint, location, "weather provider rejected request");
            return Err(classify_status(status, location, &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| ProviderError::Decode(format!("{endpoint}: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct WaErrorBody {
    error: WaError,
}

#[derive(Debug, Deserialize)]
struct WaError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WaLocation {
    name: String,
}

#[derive(Debug, Deserialize)]
struct WaHistoryResponse {
    location: Option<WaLocation>,
    forecast: crate::model::Forecast,
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    async fn fetch_forecast(
        &self,
        location: &str,
        query: ForecastQuery,
    ) -> Result<ForecastData, ProviderError> {
        let yes_no = |flag: bool| String::from(if flag { "yes" } else { "no" });

        self.get_json(
            "forecast.json",
            location,
            &[
                ("days", query.days.to_string()),
                ("aqi", yes_no(query.include_air_quality)),
                ("alerts", yes_no(query.include_alerts)),
            ],
        )
        .await
    }

    async fn fetch_history(
        &self,
        location: &str,
        date: NaiveDate,
    ) -> Result<DayRecord, ProviderError> {
        if date > latest_history_date(Utc::now()) {
            return Err(ProviderError::FutureDate(date));
        }

        let parsed: WaHistoryResponse = self
            .get_json("history.json", location, &[("dt", date.format("%Y-%m-%d").to_string())])
            .await?;

        let day = parsed
            .forecast
            .forecastday
            .into_iter()
            .next()
            .map(|d| d.day)
            .unwrap_or_default();

        Ok(DayRecord { date, location_name: parsed.location.map(|l| l.name), day })
    }
}

/// Latest date that is already "today" somewhere on Earth at `now`. Callers
/// check against their own local date; this only stops requests for days that
/// have not started in any zone.
fn latest_history_date(now: DateTime<Utc>) -> NaiveDate {
    (now + TimeDelta::hours(MAX_UTC_OFFSET_HOURS)).date_naive()
}

fn classify_reqwest(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Network(err.to_string())
    }
}

fn classify_status(status: StatusCode, location: &str, body: &str) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ProviderError::RateLimited;
    }

    match serde_json::from_str::<WaErrorBody>(body) {
        Ok(WaErrorBody { error }) if error.code == NO_LOCATION_FOUND => {
            ProviderError::InvalidLocation(location.to_string())
        }
        Ok(WaErrorBody { error }) => {
            ProviderError::Network(format!("{status}: {} (code {})", error.message, error.code))
        }
        Err(_) => ProviderError::Network(format!("{status}: {}", truncate_body(body))),
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let cut = (0..=MAX).rev().find(|&i| body.is_char_boundary(i)).unwrap_or(0);
        format!("{}...", &body[..cut])
    } else {
        body.to_string()
    }
}
