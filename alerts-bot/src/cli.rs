use std::{path::PathBuf, sync::Arc};

use alerts_core::{
    AddOutcome, CommandHandler, Config, ConfigStore, DispatchOptions, FileConfigStore,
    ForecastQuery, LocationRegistry, RecipientId, RemoveOutcome, ScheduleTrigger,
    WeatherProvider,
    commands::parse_history_date,
    provider::provider_from_config,
    report::{format_history, format_report},
    run_daily_alerts,
    schedule::{parse_time, parse_timezone},
    transport::transport_from_config,
};
use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::{Parser, Subcommand};
use inquire::{Password, Text};
use tracing::info;

use crate::bot;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather-alerts", version, about = "Daily weather alerts over Telegram")]
pub struct Cli {
    /// Config file; defaults to the platform config directory.
    #[arg(long, global = true, env = alerts_core::config::CONFIG_PATH_ENV)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactively set credentials and the alert schedule.
    Configure,

    /// Run the bot: answer chat commands and send the daily alerts.
    Run,

    /// Send today's alerts to every registered recipient right now.
    Dispatch,

    /// Print the weather report for a location.
    Report {
        /// Location name; several words are joined with spaces.
        #[arg(required = true)]
        location: Vec<String>,
    },

    /// Print the weather of a past day.
    History {
        /// Date as YYYY-MM-DD.
        date: String,

        #[arg(required = true)]
        location: Vec<String>,
    },

    /// Inspect or edit a recipient's locations.
    Locations {
        #[command(subcommand)]
        action: LocationsAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum LocationsAction {
    List {
        #[arg(long)]
        recipient: String,
    },
    Add {
        #[arg(long)]
        recipient: String,

        #[arg(required = true)]
        location: Vec<String>,
    },
    Remove {
        #[arg(long)]
        recipient: String,

        #[arg(required = true)]
        location: Vec<String>,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let store = match self.config {
            Some(path) => FileConfigStore::new(path),
            None => FileConfigStore::at_default_location()?,
        };

        match self.command {
            Command::Configure => configure(&store),
            Command::Run => run_bot(store).await,
            Command::Dispatch => dispatch(store).await,
            Command::Report { location } => report(&store, &location.join(" ")).await,
            Command::History { date, location } => {
                history(&store, &date, &location.join(" ")).await
            }
            Command::Locations { action } => locations(store, action).await,
        }
    }
}

fn load_config(store: &FileConfigStore) -> Result<Config> {
    store
        .load()
        .with_context(|| format!("Failed to load configuration from {}", store.path().display()))
}

fn configure(store: &FileConfigStore) -> Result<()> {
    let mut cfg = load_config(store)?;

    let api_key = Password::new("WeatherAPI.com API key:")
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;
    let bot_token = Password::new("Telegram bot token:")
        .without_confirmation()
        .prompt()
        .context("Failed to read bot token")?;
    let admin = Text::new("Admin chat id:")
        .with_default(cfg.telegram.admin_chat_id.as_deref().unwrap_or_default())
        .prompt()
        .context("Failed to read admin chat id")?;
    let time = Text::new("Daily alert time (HH:MM):")
        .with_default(&cfg.schedule.time)
        .prompt()
        .context("Failed to read schedule time")?;
    let timezone = Text::new("Timezone (IANA name):")
        .with_default(&cfg.schedule.timezone)
        .prompt()
        .context("Failed to read timezone")?;

    parse_time(&time)?;
    parse_timezone(&timezone)?;

    if !api_key.trim().is_empty() {
        cfg.provider.api_key = Some(api_key.trim().to_string());
    }
    if !bot_token.trim().is_empty() {
        cfg.telegram.bot_token = Some(bot_token.trim().to_string());
    }
    let admin = admin.trim();
    if !admin.is_empty() {
        cfg.telegram.admin_chat_id = Some(admin.to_string());
        if !cfg.telegram.admins.iter().any(|a| a == admin) {
            cfg.telegram.admins.push(admin.to_string());
        }
        cfg.ensure_admin_whitelisted();
    }
    cfg.schedule.time = time.trim().to_string();
    cfg.schedule.timezone = timezone.trim().to_string();

    store.save(&cfg)?;
    println!("Configuration saved to {}", store.path().display());
    Ok(())
}

async fn run_bot(store: FileConfigStore) -> Result<()> {
    let config = load_config(&store)?;
    let provider: Arc<dyn WeatherProvider> = provider_from_config(&config)?.into();
    let telegram = Arc::new(transport_from_config(&config)?);
    let trigger = ScheduleTrigger::from_settings(&config.schedule)?;
    let options = DispatchOptions::from(&config);
    let tz = trigger.timezone();

    let registry = Arc::new(LocationRegistry::new(config, Arc::new(store)));
    let handler =
        CommandHandler::new(registry.clone(), provider.clone(), telegram.clone(), options, tz);

    let schedule = tokio::spawn({
        let transport = telegram.clone();
        trigger.run(move |date| {
            let registry = registry.clone();
            let provider = provider.clone();
            let transport = transport.clone();
            async move {
                let summary = run_daily_alerts(&registry, provider, transport, options).await;
                info!(%date, ?summary, "daily alerts done");
            }
        })
    });
    let commands = tokio::spawn(bot::poll_commands(telegram, handler));

    info!("Weather alerts bot is running");
    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    schedule.abort();
    commands.abort();
    Ok(())
}

async fn dispatch(store: FileConfigStore) -> Result<()> {
    let config = load_config(&store)?;
    let provider: Arc<dyn WeatherProvider> = provider_from_config(&config)?.into();
    let transport = Arc::new(transport_from_config(&config)?);
    let options = DispatchOptions::from(&config);
    let registry = LocationRegistry::new(config, Arc::new(store));

    let summary = run_daily_alerts(&registry, provider, transport, options).await;
    println!(
        "attempted: {}, delivered: {}, failed: {}",
        summary.attempted, summary.delivered, summary.failed
    );
    Ok(())
}

async fn report(store: &FileConfigStore, location: &str) -> Result<()> {
    let config = load_config(store)?;
    let provider = provider_from_config(&config)?;
    let query = ForecastQuery::report(config.provider.forecast_days);

    let data = provider
        .fetch_forecast(location, query)
        .await
        .with_context(|| format!("Could not retrieve weather for {location}"))?;

    println!("{}", format_report(location, &data));
    Ok(())
}

async fn history(store: &FileConfigStore, date: &str, location: &str) -> Result<()> {
    let config = load_config(store)?;
    let provider = provider_from_config(&config)?;
    let tz = parse_timezone(&config.schedule.timezone)?;

    let date = parse_history_date(date, Utc::now().with_timezone(&tz).date_naive())?;
    let record = provider
        .fetch_history(location, date)
        .await
        .with_context(|| format!("Could not get history for {location} on {date}"))?;

    println!("{}", format_history(location, date, &record));
    Ok(())
}

async fn locations(store: FileConfigStore, action: LocationsAction) -> Result<()> {
    let config = load_config(&store)?;
    let provider = provider_from_config(&config).ok();
    let registry = LocationRegistry::new(config, Arc::new(store));

    match action {
        LocationsAction::List { recipient } => {
            for location in registry.list_locations(&RecipientId::from(recipient)).await {
                println!("{location}");
            }
        }
        LocationsAction::Add { recipient, location } => {
            let provider =
                provider.ok_or_else(|| anyhow!("A weather API key is needed to check locations"))?;
            let location = location.join(" ");
            let recipient = RecipientId::from(recipient);
            match registry.add_location(&recipient, &location, provider.as_ref()).await? {
                AddOutcome::Added => println!("Added '{location}' for {recipient}."),
                AddOutcome::AlreadyPresent => println!("'{location}' is already listed."),
                AddOutcome::Rejected(why) => {
                    return Err(anyhow!("Invalid city '{location}': {why}"));
                }
            }
        }
        LocationsAction::Remove { recipient, location } => {
            let location = location.join(" ");
            let recipient = RecipientId::from(recipient);
            match registry.remove_location(&recipient, &location).await? {
                RemoveOutcome::Removed => println!("Removed '{location}' for {recipient}."),
                RemoveOutcome::NotFound => println!("'{location}' not found for {recipient}."),
            }
        }
    }

    Ok(())
}
