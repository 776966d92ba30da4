//! Daily fan-out of weather reports to every whitelisted recipient.

use std::sync::Arc;

use futures::{StreamExt, stream};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    config::Config,
    model::RecipientId,
    provider::{ForecastQuery, ProviderError, WeatherProvider},
    registry::LocationRegistry,
    report::format_report,
    transport::{Formatting, MessagingTransport, TransportError},
};

/// Counts for one dispatch run. `attempted == delivered + failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Maximum number of (recipient, location) deliveries in flight at once.
    pub max_concurrency: usize,
    pub forecast_days: u8,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for DispatchOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_concurrency: config.schedule.max_concurrency.max(1),
            forecast_days: config.provider.forecast_days.max(1),
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] ProviderError),

    #[error("send failed: {0}")]
    Send(#[from] TransportError),
}

/// Fetch, format and send the report for one location.
pub async fn deliver_report(
    recipient: &RecipientId,
    location: &str,
    provider: &dyn WeatherProvider,
    transport: &dyn MessagingTransport,
    query: ForecastQuery,
) -> Result<(), DeliveryError> {
    let data = provider.fetch_forecast(location, query).await?;
    let report = format_report(location, &data);
    transport.send(recipient, &report, Formatting::RichText).await?;
    Ok(())
}

/// Send today's report for every location of every whitelisted recipient.
///
/// Each (recipient, location) pair is an independent unit of work: a failed
/// fetch or send is logged and counted, and never stops the rest of the run.
/// The registry is only read.
pub async fn run_daily_alerts(
    registry: &LocationRegistry,
    provider: Arc<dyn WeatherProvider>,
    transport: Arc<dyn MessagingTransport>,
    options: DispatchOptions,
) -> DispatchSummary {
    let jobs: Vec<(RecipientId, String)> = registry
        .dispatch_targets()
        .await
        .into_iter()
        .flat_map(|(recipient, locations)| {
            locations.into_iter().map(move |location| (recipient.clone(), location))
        })
        .collect();

    info!(deliveries = jobs.len(), "running scheduled daily weather alerts");

    let query = ForecastQuery::report(options.forecast_days);
    let results = stream::iter(jobs.into_iter().map(|(recipient, location)| {
        let provider = provider.clone();
        let transport = transport.clone();
        async move {
            let result =
                deliver_report(&recipient, &location, provider.as_ref(), transport.as_ref(), query)
                    .await;
            (recipient, location, result)
        }
    }))
    .buffer_unordered(options.max_concurrency.max(1))
    .collect::<Vec<_>>()
    .await;

    let mut summary = DispatchSummary::default();
    for (recipient, location, result) in results {
        summary.attempted += 1;
        match result {
            Ok(()) => summary.delivered += 1,
            Err(DeliveryError::Fetch(e)) => {
                summary.failed += 1;
                error!(%recipient, %location, error = %e, "could not fetch weather");
            }
            Err(DeliveryError::Send(e)) => {
                summary.failed += 1;
                warn!(%recipient, %location, error = %e, "could not deliver report");
            }
        }
    }

    info!(
        attempted = summary.attempted,
        delivered = summary.delivered,
        failed = summary.failed,
        "daily weather alerts finished"
    );
    summary
}
