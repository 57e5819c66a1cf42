//! Telegram channel: long-polls the Bot API for updates.
//!
//! Choices render as inline keyboards; taps come back as callback queries.
//! Updates are parsed by the pure `parse_update` so the mapping onto
//! workflow events can be tested without a network.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::channels::{Channel, EventStream, IncomingEvent, Prompt};
use crate::error::ChannelError;
use crate::workflow::event::{Event, MediaKind};

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const CHANNEL_NAME: &str = "telegram";

/// Telegram channel, connected to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    allowed_users: Vec<String>,
    client: reqwest::Client,
    /// Chat id per user, learned from inbound updates.
    chats: Arc<RwLock<HashMap<String, String>>>,
    /// Message id of the last prompt per chat, for in-place edits.
    last_prompt: RwLock<HashMap<String, i64>>,
}

/// An update mapped onto a workflow event.
#[derive(Debug, Clone)]
pub struct ParsedUpdate {
    pub incoming: IncomingEvent,
    pub chat_id: String,
    /// Present for button taps; must be answered.
    pub callback_id: Option<String>,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            client: reqwest::Client::new(),
            chats: Arc::new(RwLock::new(HashMap::new())),
            last_prompt: RwLock::new(HashMap::new()),
        }
    }

    fn api_url(&self, method: &str) -> String {
        api_url(self.bot_token.expose_secret(), method)
    }

    /// Check if a username is in the allowed list.
    pub fn is_user_allowed(&self, username: &str) -> bool {
        check_user_allowed(&self.allowed_users, [username])
    }

    /// Check if any of the provided identities is allowed.
    pub fn is_any_user_allowed<'a, I>(&self, identities: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        check_user_allowed(&self.allowed_users, identities)
    }

    async fn chat_for(&self, user_id: &str) -> String {
        self.chats
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| user_id.to_string())
    }

    /// POST a Bot API method and return its `result`.
    async fn call(&self, method: &str, body: &Value) -> Result<Value, ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: CHANNEL_NAME.into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        let data: Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::Http(format!("{method}: {e}")))?;

        if !status.is_success() || data.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = data
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("no description");
            return Err(ChannelError::SendFailed {
                name: CHANNEL_NAME.into(),
                reason: format!("{method} returned {status}: {description}"),
            });
        }
        Ok(data.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Send text, split at the length limit. The keyboard, if any, goes on
    /// the last chunk. Returns the id of the last message sent.
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        keyboard: Option<Value>,
    ) -> Result<Option<i64>, ChannelError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);
        let mut message_id = None;

        for (i, chunk) in chunks.iter().enumerate() {
            let mut body = serde_json::json!({
                "chat_id": chat_id,
                "text": chunk,
            });
            if i == last
                && let Some(markup) = &keyboard
            {
                body["reply_markup"] = markup.clone();
            }
            let result = self.call("sendMessage", &body).await?;
            message_id = result.get("message_id").and_then(Value::as_i64);
        }
        Ok(message_id)
    }
}

// ── Channel trait implementation ────────────────────────────────────

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<ParsedUpdate>();
        let url = self.api_url("getUpdates");
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            tracing::info!("Telegram channel listening for updates...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": 30,
                    "allowed_updates": ["message", "callback_query"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(Value::as_array) else {
                    continue;
                };
                for update in results {
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }
                    match parse_update(update) {
                        Ok(Some(parsed)) => {
                            if tx.send(parsed).is_err() {
                                tracing::info!("Telegram listener channel closed");
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => tracing::debug!("Telegram: skipping update: {e}"),
                    }
                }
            }
        });

        // Allowlist filtering, chat bookkeeping and callback answers run as
        // the stream is consumed.
        let state = StreamState {
            rx,
            allowed: self.allowed_users.clone(),
            chats: Arc::clone(&self.chats),
            client: self.client.clone(),
            answer_url: self.api_url("answerCallbackQuery"),
        };
        let stream = futures::stream::unfold(state, |mut state| async move {
            loop {
                let parsed = state.rx.recv().await?;
                if let Some(callback_id) = &parsed.callback_id {
                    state.answer(callback_id).await;
                }
                let username = parsed
                    .incoming
                    .metadata
                    .get("username")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                if !check_user_allowed(
                    &state.allowed,
                    [username, parsed.incoming.user_id.as_str()],
                ) {
                    tracing::warn!(
                        "Telegram: ignoring update from unauthorized user: \
                         username={username}, user_id={}",
                        parsed.incoming.user_id
                    );
                    continue;
                }
                state
                    .chats
                    .write()
                    .await
                    .insert(parsed.incoming.user_id.clone(), parsed.chat_id);
                return Some((parsed.incoming, state));
            }
        });

        Ok(Box::pin(stream))
    }

    async fn send_prompt(&self, user_id: &str, prompt: &Prompt) -> Result<(), ChannelError> {
        let chat_id = self.chat_for(user_id).await;
        let message_id = self
            .send_message(&chat_id, &prompt.text, inline_keyboard(prompt))
            .await?;
        let mut last = self.last_prompt.write().await;
        match message_id {
            Some(id) => {
                last.insert(chat_id, id);
            }
            None => {
                last.remove(&chat_id);
            }
        }
        Ok(())
    }

    async fn edit_last_prompt(&self, user_id: &str, prompt: &Prompt) -> Result<(), ChannelError> {
        let chat_id = self.chat_for(user_id).await;
        let last = self.last_prompt.read().await.get(&chat_id).copied();

        if let Some(message_id) = last
            && prompt.text.len() <= TELEGRAM_MAX_MESSAGE_LENGTH
        {
            let mut body = serde_json::json!({
                "chat_id": chat_id,
                "message_id": message_id,
                "text": prompt.text,
            });
            if let Some(markup) = inline_keyboard(prompt) {
                body["reply_markup"] = markup;
            }
            match self.call("editMessageText", &body).await {
                Ok(_) => return Ok(()),
                Err(e) => tracing::debug!("Telegram edit failed, sending instead: {e}"),
            }
        }
        self.send_prompt(user_id, prompt).await
    }

    async fn send_notice(&self, user_id: &str, text: &str) -> Result<(), ChannelError> {
        let chat_id = self.chat_for(user_id).await;
        self.send_message(&chat_id, text, None).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: CHANNEL_NAME.into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: CHANNEL_NAME.into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

// ── Stream-side helpers ─────────────────────────────────────────────

/// Everything the inbound stream needs, detached from `&self`.
struct StreamState {
    rx: tokio::sync::mpsc::UnboundedReceiver<ParsedUpdate>,
    allowed: Vec<String>,
    chats: Arc<RwLock<HashMap<String, String>>>,
    client: reqwest::Client,
    answer_url: String,
}

impl StreamState {
    async fn answer(&self, callback_id: &str) {
        let body = serde_json::json!({ "callback_query_id": callback_id });
        if let Err(e) = self.client.post(&self.answer_url).json(&body).send().await {
            tracing::debug!("Telegram answerCallbackQuery failed: {e}");
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn api_url(token: &str, method: &str) -> String {
    format!("https://api.telegram.org/bot{token}/{method}")
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

/// Inline keyboard for a prompt's choices, `None` when it has none.
fn inline_keyboard(prompt: &Prompt) -> Option<Value> {
    if prompt.choices.is_empty() {
        return None;
    }
    let rows: Vec<Value> = prompt
        .choices
        .iter()
        .map(|row| {
            Value::Array(
                row.iter()
                    .map(|c| serde_json::json!({ "text": c.label, "callback_data": c.token }))
                    .collect(),
            )
        })
        .collect();
    Some(serde_json::json!({ "inline_keyboard": rows }))
}

/// Map a raw update onto an inbound event.
///
/// Returns `Ok(None)` for update kinds the bot does not handle (edits,
/// stickers, channel posts).
pub fn parse_update(update: &Value) -> Result<Option<ParsedUpdate>, ChannelError> {
    if let Some(callback) = update.get("callback_query") {
        let callback_id = callback
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ChannelError::InvalidUpdate("callback_query without id".into()))?;
        let from = callback
            .get("from")
            .ok_or_else(|| ChannelError::InvalidUpdate("callback_query without from".into()))?;
        let data = callback.get("data").and_then(Value::as_str).unwrap_or("");
        if data.is_empty() {
            return Ok(None);
        }
        let chat_id = callback
            .get("message")
            .and_then(|m| m.get("chat"))
            .and_then(|c| c.get("id"))
            .and_then(Value::as_i64)
            .map(|id| id.to_string());
        return build(from, chat_id, Event::from_choice(data), Some(callback_id.into()));
    }

    let Some(message) = update.get("message") else {
        return Ok(None);
    };
    let from = message
        .get("from")
        .ok_or_else(|| ChannelError::InvalidUpdate("message without from".into()))?;
    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)
        .map(|id| id.to_string());

    let event = if let Some(text) = message.get("text").and_then(Value::as_str) {
        Event::from_text(text)
    } else if let Some(sizes) = message.get("photo").and_then(Value::as_array) {
        // Sizes are ordered smallest first.
        let Some(file_id) = sizes
            .last()
            .and_then(|p| p.get("file_id"))
            .and_then(Value::as_str)
        else {
            return Err(ChannelError::InvalidUpdate("photo without file_id".into()));
        };
        Event::media(MediaKind::Photo, file_id)
    } else if let Some((kind, file_id)) = [
        ("document", MediaKind::Document),
        ("video", MediaKind::Video),
        ("voice", MediaKind::Voice),
    ]
    .into_iter()
    .find_map(|(field, kind)| {
        message
            .get(field)
            .and_then(|f| f.get("file_id"))
            .and_then(Value::as_str)
            .map(|id| (kind, id))
    }) {
        Event::media(kind, file_id)
    } else {
        return Ok(None);
    };

    build(from, chat_id, event, None)
}

fn build(
    from: &Value,
    chat_id: Option<String>,
    event: Event,
    callback_id: Option<String>,
) -> Result<Option<ParsedUpdate>, ChannelError> {
    let user_id = from
        .get("id")
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
        .ok_or_else(|| ChannelError::InvalidUpdate("sender without id".into()))?;
    let username = from.get("username").and_then(Value::as_str).unwrap_or("unknown");
    let first_name = from.get("first_name").and_then(Value::as_str);
    let chat_id = chat_id.unwrap_or_else(|| user_id.clone());

    let incoming = IncomingEvent::new(CHANNEL_NAME, &user_id, event)
        .with_user_name(first_name.unwrap_or(username))
        .with_metadata(serde_json::json!({
            "chat_id": chat_id,
            "username": username,
        }));

    Ok(Some(ParsedUpdate {
        incoming,
        chat_id,
        callback_id,
    }))
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.chars().count() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        // Byte offset of the `max_len`-th char keeps the cut on a boundary.
        let limit = remaining
            .char_indices()
            .nth(max_len)
            .map_or(remaining.len(), |(i, _)| i);
        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(limit);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
