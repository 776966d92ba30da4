//! Core library for the weather alerts bot.
//!
//! This crate defines:
//! - Configuration & persistence of recipients and their locations
//! - Abstractions over the weather provider and the messaging transport
//! - Report formatting (rain periods, air quality, advice)
//! - The location registry, the daily dispatcher and its schedule trigger
//! - Chat command handlers
//!
//! It is used by `alerts-bot`, but can also be reused by other binaries or services.

pub mod commands;
pub mod config;
pub mod dispatch;
pub mod model;
pub mod provider;
pub mod registry;
pub mod report;
pub mod schedule;
pub mod transport;

pub use commands::{Command, CommandHandler, ValidationError};
pub use config::{Config, ConfigStore, FileConfigStore, StoreError};
pub use dispatch::{DispatchOptions, DispatchSummary, run_daily_alerts};
pub use model::{DayRecord, ForecastData, RecipientId};
pub use provider::{ForecastQuery, ProviderError, WeatherProvider};
pub use registry::{AddOutcome, GrantOutcome, LocationRegistry, RegistryError, RemoveOutcome};
pub use schedule::{ScheduleError, ScheduleTrigger};
pub use transport::{Formatting, MessagingTransport, TransportError};
