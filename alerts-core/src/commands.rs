//! Chat command parsing and the handlers behind each command.
//!
//! Handlers take explicit arguments and return the replies to send, so the
//! same code serves the bot loop, the admin `/mock` command and tests.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    dispatch::{DispatchOptions, run_daily_alerts},
    model::RecipientId,
    provider::{ForecastQuery, WeatherProvider},
    registry::{AddOutcome, GrantOutcome, LocationRegistry, RegistryError, RemoveOutcome},
    report::{format_history, format_report},
    transport::MessagingTransport,
};

pub const HELP_TEXT: &str = "*Welcome to the Weather Alerts Bot!*\n\n\
    */weather [city]*: Get current weather. Shows all your locations if no city is specified.\n\
    */add <city>*: Add a city to your daily alert list.\n\
    */remove <city>*: Remove a city from your list.\n\
    */list*: View your list of registered locations.\n\
    */history <YYYY-MM-DD> <city>*: Weather of a past day.\n\
    */help*: Show this help message.";

const SAVE_FAILED: &str = "Could not save your change, please try again later.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/start` and `/help`.
    Help,
    Weather(Option<String>),
    Add(String),
    Remove(String),
    List,
    History { date: String, location: String },
    /// `/buymeacoffee`: self-service whitelisting.
    Whitelist,
    /// Admin-only re-invocation of another command. `None` when no command was given.
    Mock(Option<Box<Command>>),
    /// Run the daily dispatch immediately; only reachable through `/mock`.
    ScheduledAlert,
    Unknown(String),
}

impl Command {
    /// Parse a chat message. Returns `None` for anything that is not a `/command`.
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.trim().strip_prefix('/')?;
        let (head, args) = split_first_word(rest);
        // Group chats address commands as `/add@SomeBot`.
        let name = head.split('@').next().unwrap_or(head);
        if name.is_empty() {
            return None;
        }
        Some(Self::from_parts(name, args))
    }

    fn from_parts(name: &str, args: &str) -> Self {
        let args = args.split_whitespace().collect::<Vec<_>>().join(" ");

        match name.to_lowercase().as_str() {
            "start" | "help" => Command::Help,
            "weather" => Command::Weather(Some(args).filter(|a| !a.is_empty())),
            "add" => Command::Add(args),
            "remove" => Command::Remove(args),
            "list" => Command::List,
            "history" => {
                let (date, location) = split_first_word(&args);
                Command::History { date: date.to_string(), location: location.to_string() }
            }
            "buymeacoffee" => Command::Whitelist,
            "mock" => {
                let (inner, inner_args) = split_first_word(&args);
                let inner = inner.trim_start_matches('/');
                if inner.is_empty() {
                    Command::Mock(None)
                } else {
                    Command::Mock(Some(Box::new(Self::from_parts(inner, inner_args))))
                }
            }
            "scheduledalert" => Command::ScheduledAlert,
            other => Command::Unknown(other.to_string()),
        }
    }
}

fn split_first_word(text: &str) -> (&str, &str) {
    match text.trim().split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (text.trim(), ""),
    }
}

/// Bad command input. Reported back to the caller; nothing changes. A missing
/// or empty argument is a `Usage` error naming the expected form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Invalid date format. Please use YYYY-MM-DD.")]
    InvalidDate,

    #[error("Cannot get history for a future date.")]
    FutureDate,
}

/// Parse a `YYYY-MM-DD` date that must not be after `today`.
pub fn parse_history_date(value: &str, today: NaiveDate) -> Result<NaiveDate, ValidationError> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ValidationError::InvalidDate)?;
    if date > today {
        return Err(ValidationError::FutureDate);
    }
    Ok(date)
}

#[derive(Debug, Clone)]
pub struct CommandHandler {
    registry: Arc<LocationRegistry>,
    provider: Arc<dyn WeatherProvider>,
    transport: Arc<dyn MessagingTransport>,
    options: DispatchOptions,
    tz: Tz,
}

impl CommandHandler {
    pub fn new(
        registry: Arc<LocationRegistry>,
        provider: Arc<dyn WeatherProvider>,
        transport: Arc<dyn MessagingTransport>,
        options: DispatchOptions,
        tz: Tz,
    ) -> Self {
        Self { registry, provider, transport, options, tz }
    }

    /// Handle a command from `sender`, with "today" taken in the schedule's zone.
    pub async fn handle(&self, sender: &RecipientId, command: Command) -> Vec<String> {
        let today = Utc::now().with_timezone(&self.tz).date_naive();
        self.handle_on(sender, command, today).await
    }

    /// Returns the replies to send back. Unauthorized senders get none.
    pub async fn handle_on(
        &self,
        sender: &RecipientId,
        command: Command,
        today: NaiveDate,
    ) -> Vec<String> {
        match command {
            Command::Mock(inner) => self.mock(sender, inner, today).await,
            other => self.route(sender, other, today).await,
        }
    }

    async fn route(&self, sender: &RecipientId, command: Command, today: NaiveDate) -> Vec<String> {
        match command {
            Command::Help => return vec![HELP_TEXT.to_string()],
            Command::Whitelist => return self.whitelist(sender).await,
            Command::Mock(_) | Command::ScheduledAlert | Command::Unknown(_) => return vec![],
            _ => {}
        }

        if !self.registry.is_authorized(sender).await {
            debug!(%sender, "ignoring command from unauthorized recipient");
            return vec![];
        }

        match command {
            Command::Weather(location) => self.weather(sender, location).await,
            Command::Add(location) => vec![self.add(sender, &location).await],
            Command::Remove(location) => vec![self.remove(sender, &location).await],
            Command::List => vec![self.list(sender).await],
            Command::History { date, location } => {
                vec![self.history(&date, &location, today).await]
            }
            _ => vec![],
        }
    }

    async fn mock(
        &self,
        sender: &RecipientId,
        inner: Option<Box<Command>>,
        today: NaiveDate,
    ) -> Vec<String> {
        if !self.registry.is_admin(sender).await {
            return vec!["You are not authorized to use this command.".to_string()];
        }

        let Some(inner) = inner else {
            return vec![ValidationError::Usage("/mock <command> [args...]").to_string()];
        };

        info!(%sender, command = ?inner, "admin mock command");
        match *inner {
            Command::ScheduledAlert => {
                let summary = run_daily_alerts(
                    &self.registry,
                    self.provider.clone(),
                    self.transport.clone(),
                    self.options,
                )
                .await;
                vec![format!(
                    "Scheduled alerts sent: {} attempted, {} delivered, {} failed.",
                    summary.attempted, summary.delivered, summary.failed
                )]
            }
            Command::Unknown(name) => {
                vec![format!("Command '/{name}' cannot be mocked or does not exist.")]
            }
            Command::Mock(_) => {
                vec!["Command '/mock' cannot be mocked or does not exist.".to_string()]
            }
            other => self.route(sender, other, today).await,
        }
    }

    async fn weather(&self, sender: &RecipientId, location: Option<String>) -> Vec<String> {
        let locations = match location {
            Some(location) => vec![location],
            None => self.registry.list_locations(sender).await,
        };

        if locations.is_empty() {
            return vec!["Please specify a city or add one with /add <city>.".to_string()];
        }

        let query = ForecastQuery::report(self.options.forecast_days);
        let mut replies = Vec::with_capacity(locations.len());
        for location in locations {
            match self.provider.fetch_forecast(&location, query).await {
                Ok(data) => replies.push(format_report(&location, &data)),
                Err(e) => {
                    warn!(%sender, %location, error = %e, "on-demand weather fetch failed");
                    replies.push(format!("Could not retrieve weather for {location}."));
                }
            }
        }
        replies
    }

    async fn add(&self, sender: &RecipientId, location: &str) -> String {
        if location.is_empty() {
            return ValidationError::Usage("/add <city>").to_string();
        }

        match self.registry.add_location(sender, location, self.provider.as_ref()).await {
            Ok(AddOutcome::Added) => format!("Added '{location}' to your locations."),
            Ok(AddOutcome::AlreadyPresent) => format!("'{location}' is already in your list."),
            Ok(AddOutcome::Rejected(_)) => {
                format!("Invalid city: '{location}'. Please check the name.")
            }
            Err(RegistryError::Provider(e)) => {
                format!("Could not check '{location}' right now ({e}), please try again later.")
            }
            Err(RegistryError::Persistence(_)) => SAVE_FAILED.to_string(),
        }
    }

    async fn remove(&self, sender: &RecipientId, location: &str) -> String {
        if location.is_empty() {
            return ValidationError::Usage("/remove <city>").to_string();
        }

        match self.registry.remove_location(sender, location).await {
            Ok(RemoveOutcome::Removed) => format!("Removed '{location}'."),
            Ok(RemoveOutcome::NotFound) => format!("'{location}' not found in your list."),
            Err(_) => SAVE_FAILED.to_string(),
        }
    }

    async fn list(&self, sender: &RecipientId) -> String {
        let locations = self.registry.list_locations(sender).await;
        if locations.is_empty() {
            "You have no locations.".to_string()
        } else {
            format!("*Your locations:*\n- {}", locations.join("\n- "))
        }
    }

    async fn history(&self, date: &str, location: &str, today: NaiveDate) -> String {
        if date.is_empty() || location.is_empty() {
            return ValidationError::Usage("/history <YYYY-MM-DD> <city>").to_string();
        }

        let date = match parse_history_date(date, today) {
            Ok(date) => date,
            Err(e) => return e.to_string(),
        };

        match self.provider.fetch_history(location, date).await {
            Ok(record) => format_history(location, date, &record),
            Err(e) => {
                warn!(location, %date, error = %e, "history fetch failed");
                format!("Could not get history for {location} on {}.", date.format("%Y-%m-%d"))
            }
        }
    }

    async fn whitelist(&self, sender: &RecipientId) -> Vec<String> {
        let reply = match self.registry.grant_whitelist(sender).await {
            Ok(GrantOutcome::Granted) => "You are now whitelisted! Use /start to see commands.",
            Ok(GrantOutcome::AlreadyPresent) => "You are already whitelisted.",
            Err(_) => SAVE_FAILED,
        };
        vec![reply.to_string()]
    }
}
