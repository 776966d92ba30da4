use crate::{
    Config,
    model::{DayRecord, ForecastData},
    provider::weatherapi::WeatherApiProvider,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt::Debug;
use thiserror::Error;

pub mod weatherapi;

/// Why a provider call failed.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("unknown location '{0}'")]
    InvalidLocation(String),

    #[error("weather provider rate limit reached")]
    RateLimited,

    #[error("weather provider request timed out")]
    Timeout,

    #[error("date {0} is in the future")]
    FutureDate(NaiveDate),

    #[error("failed to decode weather provider response: {0}")]
    Decode(String),
}

/// Shape of a forecast request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForecastQuery {
    pub days: u8,
    pub include_air_quality: bool,
    pub include_alerts: bool,
}

impl ForecastQuery {
    /// Full query used for reports.
    pub fn report(days: u8) -> Self {
        Self { days: days.max(1), include_air_quality: true, include_alerts: true }
    }

    /// Cheapest query that still tells whether the provider knows the location.
    pub fn probe() -> Self {
        Self { days: 1, include_air_quality: false, include_alerts: false }
    }
}

#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    async fn fetch_forecast(
        &self,
        location: &str,
        query: ForecastQuery,
    ) -> Result<ForecastData, ProviderError>;

    /// Aggregates for a past day. Implementations reject future dates.
    async fn fetch_history(&self, location: &str, date: NaiveDate)
    -> Result<DayRecord, ProviderError>;
}

/// Construct the provider from config.
pub fn provider_from_config(config: &Config) -> anyhow::Result<Box<dyn WeatherProvider>> {
    let api_key = config.provider_api_key().ok_or_else(|| {
        anyhow::anyhow!(
            "No weather API key configured.\n\
                 Hint: run `weather-alerts configure` and enter your WeatherAPI.com key."
        )
    })?;

    Ok(Box::new(WeatherApiProvider::new(api_key.to_owned())))
}
