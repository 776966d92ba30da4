use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::warn;

use crate::model::RecipientId;

use super::{Formatting, MessagingTransport, TransportError};

const DEFAULT_BASE_URL: &str = "https://api.telegram.org";
const SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Telegram Bot API client used both for delivering reports and for
/// long-polling incoming commands.
#[derive(Debug, Clone)]
pub struct TelegramTransport {
    token: String,
    base_url: String,
    http: Client,
}

/// A text message received by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub update_id: i64,
    /// Chat to reply into.
    pub chat: RecipientId,
    /// User who sent the message; authorization is checked against this id.
    pub sender: RecipientId,
    pub text: String,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TgResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUpdate {
    update_id: i64,
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    chat: TgEntity,
    from: Option<TgEntity>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgEntity {
    id: i64,
}

impl TelegramTransport {
    pub fn new(token: String) -> Self {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(token: String, base_url: impl Into<String>) -> Self {
        Self { token, base_url: base_url.into(), http: Client::new() }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.base_url, self.token)
    }

    async fn call<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
        timeout: Duration,
        recipient: Option<&RecipientId>,
    ) -> Result<T, TransportError> {
        let res = self
            .http
            .post(self.method_url(method))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            // The request URL embeds the bot token; keep it out of the error.
            .map_err(|e| TransportError::Transport(e.without_url().to_string()))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| TransportError::Transport(e.without_url().to_string()))?;

        let parsed: TgResponse<T> = serde_json::from_str(&body)
            .map_err(|e| TransportError::Decode(format!("{method}: {e}")))?;

        match (parsed.ok, parsed.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(classify_failure(status, parsed.description, recipient)),
        }
    }

    /// Long-poll for new messages. Returns the messages and the offset to
    /// acknowledge them with on the next call.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<(Vec<IncomingMessage>, Option<i64>), TransportError> {
        let mut body = serde_json::json!({
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });
        if let Some(offset) = offset {
            body["offset"] = offset.into();
        }

        let updates: Vec<TgUpdate> = self
            .call("getUpdates", &body, Duration::from_secs(timeout_secs + 10), None)
            .await?;

        let next_offset = updates.iter().map(|u| u.update_id + 1).max().or(offset);
        Ok((incoming_messages(updates), next_offset))
    }
}

fn incoming_messages(updates: Vec<TgUpdate>) -> Vec<IncomingMessage> {
    updates
        .into_iter()
        .filter_map(|u| {
            let message = u.message?;
            let text = message.text?;
            let sender = message.from.map(|f| f.id).unwrap_or(message.chat.id);
            Some(IncomingMessage {
                update_id: u.update_id,
                chat: RecipientId::from(message.chat.id),
                sender: RecipientId::from(sender),
                text,
            })
        })
        .collect()
}

fn classify_failure(
    status: StatusCode,
    description: Option<String>,
    recipient: Option<&RecipientId>,
) -> TransportError {
    let description = description.unwrap_or_else(|| status.to_string());
    match recipient {
        Some(recipient) if status == StatusCode::FORBIDDEN => {
            TransportError::Blocked(recipient.clone())
        }
        _ => TransportError::Transport(format!("{status}: {description}")),
    }
}

fn is_markup_error(err: &TransportError) -> bool {
    matches!(err, TransportError::Transport(msg) if msg.contains("can't parse entities"))
}

#[async_trait]
impl MessagingTransport for TelegramTransport {
    async fn send(
        &self,
        recipient: &RecipientId,
        text: &str,
        formatting: Formatting,
    ) -> Result<(), TransportError> {
        let parse_mode = match formatting {
            Formatting::RichText => Some("Markdown"),
            Formatting::Plain => None,
        };
        let message = SendMessage { chat_id: recipient.as_str(), text, parse_mode };

        let sent: Result<serde_json::Value, _> =
            self.call("sendMessage", &message, SEND_TIMEOUT, Some(recipient)).await;

        match sent {
            Ok(_) => Ok(()),
            // Free-text location names can contain stray markup characters.
            Err(err) if parse_mode.is_some() && is_markup_error(&err) => {
                warn!(%recipient, "markdown rejected, resending as plain text");
                let plain = SendMessage { parse_mode: None, ..message };
                self.call::<_, serde_json::Value>(
                    "sendMessage",
                    &plain,
                    SEND_TIMEOUT,
                    Some(recipient),
                )
                .await
                .map(|_| ())
            }
            Err(err) => Err(err),
        }
    }
}
