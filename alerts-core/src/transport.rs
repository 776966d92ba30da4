use crate::{Config, model::RecipientId, transport::telegram::TelegramTransport};
use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;

pub mod telegram;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("recipient {0} has blocked the bot")]
    Blocked(RecipientId),

    #[error("failed to decode transport response: {0}")]
    Decode(String),
}

/// How the message body should be interpreted by the receiving client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Formatting {
    /// Markdown emphasis (`*bold*`, `_italic_`).
    #[default]
    RichText,
    Plain,
}

#[async_trait]
pub trait MessagingTransport: Send + Sync + Debug {
    async fn send(
        &self,
        recipient: &RecipientId,
        text: &str,
        formatting: Formatting,
    ) -> Result<(), TransportError>;
}

/// Construct the Telegram transport from config.
pub fn transport_from_config(config: &Config) -> anyhow::Result<TelegramTransport> {
    let token = config.bot_token().ok_or_else(|| {
        anyhow::anyhow!(
            "No bot token configured.\n\
                 Hint: run `weather-alerts configure` and enter your Telegram bot token."
        )
    })?;

    Ok(TelegramTransport::new(token.to_owned()))
}
