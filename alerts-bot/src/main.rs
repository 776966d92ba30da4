//! Binary crate for the `weather-alerts` bot.
//!
//! This crate focuses on:
//! - Parsing CLI arguments
//! - Interactive configuration
//! - Running the chat command loop next to the daily alert schedule

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod bot;
mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("weather_alerts=info".parse()?)
                .add_directive("alerts_core=info".parse()?),
        )
        .init();

    let cmd = cli::Cli::parse();
    cmd.run().await
}
