//! Telegram front-end: Bot API `Messenger` plus a long-poll update loop.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::engine::{Engine, InboundEvent};
use crate::error::{ChannelError, ConfigError};
use crate::ports::{Choice, MessageHandle, Messenger};

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll timeout passed to getUpdates, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Telegram adapter configuration.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    pub allowed_users: Vec<String>,
}

impl TelegramConfig {
    /// Read `TELEGRAM_BOT_TOKEN` (required) and `TELEGRAM_ALLOWED_USERS` (default `*`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".into()))?;
        let allowed_users = parse_allowed(
            &std::env::var("TELEGRAM_ALLOWED_USERS").unwrap_or_else(|_| "*".to_string()),
        );
        Ok(Self {
            bot_token: SecretString::from(bot_token),
            allowed_users,
        })
    }
}

fn parse_allowed(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub struct TelegramChannel {
    bot_token: SecretString,
    allowed_users: Vec<String>,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            bot_token: config.bot_token,
            allowed_users: config.allowed_users,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.bot_token.expose_secret()
        )
    }

    /// Check if any of the provided identities is allowed.
    pub fn is_any_user_allowed<'a, I>(&self, identities: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        check_user_allowed(&self.allowed_users, identities)
    }

    /// POST a Bot API method, returning the `result` field.
    async fn call(&self, method: &str, body: &Value) -> Result<Value, ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(format!("{method}: {e}")))?;

        let status = resp.status();
        let data: Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::InvalidMessage(format!("{method}: {e}")))?;

        if !status.is_success() || data.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = data
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("no description");
            return Err(ChannelError::Http(format!("{method} returned {status}: {description}")));
        }
        Ok(data.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Send with Markdown, retrying as plain text if Telegram rejects the markup.
    async fn send_with_fallback(&self, mut body: Value) -> Result<MessageHandle, ChannelError> {
        let chat_id = body["chat_id"].as_str().unwrap_or_default().to_string();
        body["parse_mode"] = Value::String("Markdown".into());

        let result = match self.call("sendMessage", &body).await {
            Ok(result) => result,
            Err(markdown_err) => {
                tracing::warn!("Telegram sendMessage with Markdown failed ({markdown_err}); retrying without parse_mode");
                if let Some(obj) = body.as_object_mut() {
                    obj.remove("parse_mode");
                }
                self.call("sendMessage", &body)
                    .await
                    .map_err(|plain_err| ChannelError::SendFailed {
                        name: "telegram".into(),
                        reason: format!("markdown: {markdown_err}; plain: {plain_err}"),
                    })?
            }
        };

        Ok(MessageHandle {
            chat_id,
            message_id: message_id_of(&result),
        })
    }

    /// Fetch updates after `offset`, returning events and the next offset.
    pub async fn poll_updates(&self, offset: i64) -> Result<(Vec<InboundEvent>, i64), ChannelError> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": POLL_TIMEOUT_SECS,
            "allowed_updates": ["message", "callback_query"]
        });
        let result = self.call("getUpdates", &body).await?;

        let mut next = offset;
        let mut events = Vec::new();
        for update in result.as_array().into_iter().flatten() {
            if let Some(id) = update.get("update_id").and_then(Value::as_i64) {
                next = next.max(id + 1);
            }
            if let Some(callback_id) = update
                .get("callback_query")
                .and_then(|c| c.get("id"))
                .and_then(Value::as_str)
            {
                let ack = serde_json::json!({ "callback_query_id": callback_id });
                if let Err(e) = self.call("answerCallbackQuery", &ack).await {
                    tracing::debug!("answerCallbackQuery failed: {e}");
                }
            }
            match parse_update(update, &self.allowed_users) {
                Some(event) => events.push(event),
                None => tracing::debug!("Skipping unsupported or unauthorized update"),
            }
        }
        Ok((events, next))
    }

    /// Long-poll forever, dispatching every event into the engine.
    pub async fn run_polling(&self, engine: Engine) {
        tracing::info!("Telegram channel listening for updates...");
        let mut offset = 0;
        loop {
            match self.poll_updates(offset).await {
                Ok((events, next)) => {
                    offset = next;
                    for event in events {
                        engine.dispatch(event);
                    }
                }
                Err(e) => {
                    tracing::warn!("Telegram poll error: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                }
            }
        }
    }
}

#[async_trait]
impl Messenger for TelegramChannel {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<MessageHandle, ChannelError> {
        let mut last = None;
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            let body = serde_json::json!({ "chat_id": chat_id, "text": chunk });
            last = Some(self.send_with_fallback(body).await?);
        }
        last.ok_or_else(|| ChannelError::InvalidMessage("empty message".into()))
    }

    async fn send_choices(
        &self,
        chat_id: &str,
        text: &str,
        choices: &[Choice],
    ) -> Result<MessageHandle, ChannelError> {
        let keyboard: Vec<Value> = choices
            .iter()
            .map(|c| serde_json::json!([{ "text": c.label, "callback_data": c.payload }]))
            .collect();
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "reply_markup": { "inline_keyboard": keyboard }
        });
        self.send_with_fallback(body).await
    }

    async fn edit_text(&self, handle: &MessageHandle, text: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "chat_id": handle.chat_id,
            "message_id": handle.message_id.parse::<i64>().unwrap_or_default(),
            "text": text,
        });
        self.call("editMessageText", &body)
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::EditFailed {
                name: "telegram".into(),
                handle: handle.message_id.clone(),
                reason: e.to_string(),
            })
    }

    async fn delete(&self, handle: &MessageHandle) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "chat_id": handle.chat_id,
            "message_id": handle.message_id.parse::<i64>().unwrap_or_default(),
        });
        self.call("deleteMessage", &body).await.map(|_| ())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn message_id_of(result: &Value) -> String {
    result
        .get("message_id")
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
        .unwrap_or_default()
}

/// Map one Telegram update to an engine event, honouring the allowlist.
pub fn parse_update(update: &Value, allowed_users: &[String]) -> Option<InboundEvent> {
    if let Some(query) = update.get("callback_query") {
        let from = query.get("from")?;
        if !sender_allowed(from, allowed_users) {
            return None;
        }
        let user_id = from.get("id").and_then(Value::as_i64)?.to_string();
        let chat_id = query
            .get("message")
            .and_then(|m| m.get("chat"))
            .and_then(|c| c.get("id"))
            .and_then(Value::as_i64)
            .map_or_else(|| user_id.clone(), |id| id.to_string());
        let payload = query.get("data").and_then(Value::as_str)?.to_string();
        return Some(InboundEvent::Select {
            user_id,
            chat_id,
            payload,
        });
    }

    let message = update.get("message")?;
    let from = message.get("from")?;
    if !sender_allowed(from, allowed_users) {
        tracing::warn!("Telegram: ignoring message from unauthorized user");
        return None;
    }
    let user_id = from.get("id").and_then(Value::as_i64)?.to_string();
    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)?
        .to_string();
    let text = message.get("text").and_then(Value::as_str)?.trim();

    // "/start@MyBot args" → "/start"
    let command = text
        .split_whitespace()
        .next()
        .and_then(|w| w.split('@').next())
        .unwrap_or_default();
    Some(match command {
        "/start" => InboundEvent::Start { user_id, chat_id },
        "/cancel" => InboundEvent::Cancel { user_id, chat_id },
        _ => InboundEvent::Text {
            user_id,
            chat_id,
            text: text.to_string(),
        },
    })
}

fn sender_allowed(from: &Value, allowed_users: &[String]) -> bool {
    let username = from.get("username").and_then(Value::as_str).unwrap_or("unknown");
    let id = from
        .get("id")
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
        .unwrap_or_default();
    check_user_allowed(allowed_users, [username, id.as_str()])
}

/// Check if any identity in the iterator matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts on a char boundary.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(limit);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { limit } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(allowed: &[&str]) -> TelegramChannel {
        TelegramChannel::new(TelegramConfig {
            bot_token: SecretString::from("123:ABC".to_string()),
            allowed_users: allowed.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn text_update(user: i64, username: &str, text: &str) -> Value {
        serde_json::json!({
            "update_id": 10,
            "message": {
                "from": { "id": user, "username": username },
                "chat": { "id": 555 },
                "text": text
            }
        })
    }

    #[test]
    fn telegram_api_url() {
        assert_eq!(
            channel(&[]).api_url("getMe"),
            "https://api.telegram.org/bot123:ABC/getMe"
        );
    }

    #[test]
    fn allowlist_by_username_or_numeric_id() {
        let ch = channel(&["alice", "987"]);
        assert!(ch.is_any_user_allowed(["alice", "1"]));
        assert!(ch.is_any_user_allowed(["unknown", "987"]));
        assert!(!ch.is_any_user_allowed(["malice", "98"]));
        assert!(channel(&["*"]).is_any_user_allowed(["anyone"]));
        assert!(!channel(&[]).is_any_user_allowed(["anyone"]));
    }

    #[test]
    fn parse_allowed_trims_and_drops_blanks() {
        assert_eq!(parse_allowed(" a, ,b ,"), vec!["a", "b"]);
    }

    #[test]
    fn parses_commands_and_text() {
        let all = vec!["*".to_string()];
        assert_eq!(
            parse_update(&text_update(1, "a", "/start"), &all),
            Some(InboundEvent::Start {
                user_id: "1".into(),
                chat_id: "555".into()
            })
        );
        assert_eq!(
            parse_update(&text_update(1, "a", "/cancel@VerifyBot"), &all),
            Some(InboundEvent::Cancel {
                user_id: "1".into(),
                chat_id: "555".into()
            })
        );
        assert_eq!(
            parse_update(&text_update(1, "a", "  John Smith "), &all),
            Some(InboundEvent::Text {
                user_id: "1".into(),
                chat_id: "555".into(),
                text: "John Smith".into()
            })
        );
    }

    #[test]
    fn parses_callback_selection() {
        let update = serde_json::json!({
            "update_id": 11,
            "callback_query": {
                "id": "cb1",
                "from": { "id": 7, "username": "bob" },
                "message": { "chat": { "id": 777 } },
                "data": "select:3"
            }
        });
        assert_eq!(
            parse_update(&update, &["bob".to_string()]),
            Some(InboundEvent::Select {
                user_id: "7".into(),
                chat_id: "777".into(),
                payload: "select:3".into()
            })
        );
    }

    #[test]
    fn unauthorized_and_non_text_updates_are_dropped() {
        assert!(parse_update(&text_update(1, "eve", "/start"), &["alice".to_string()]).is_none());

        let sticker = serde_json::json!({
            "update_id": 12,
            "message": { "from": { "id": 1 }, "chat": { "id": 2 }, "sticker": {} }
        });
        assert!(parse_update(&sticker, &["*".to_string()]).is_none());
    }

    #[test]
    fn message_id_extraction() {
        assert_eq!(message_id_of(&serde_json::json!({"message_id": 42})), "42");
        assert_eq!(message_id_of(&Value::Null), "");
    }

    #[test]
    fn split_message_short() {
        assert_eq!(split_message("Hello", 4096), vec!["Hello"]);
    }

    #[test]
    fn split_message_over_limit_on_newline() {
        let msg = format!("{}\n{}", "a".repeat(2000), "b".repeat(3000));
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks, vec!["a".repeat(2000), "b".repeat(3000)]);
    }

    #[test]
    fn split_message_hard_cut_respects_char_boundary() {
        let msg = "é".repeat(3000); // 6000 bytes
        let chunks = split_message(&msg, 4095);
        assert!(chunks.iter().all(|c| c.len() <= 4095));
        assert_eq!(chunks.concat(), msg);
    }
}
