//! Channel and transport traits, plus the message types they exchange.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChannelError;
use crate::workflow::event::Event;

/// A tappable option attached to a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub label: String,
    /// Delivered back as an `Action` (or a `Command` when it starts with `/`).
    pub token: String,
}

impl Choice {
    pub fn new(label: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            token: token.into(),
        }
    }

    pub fn cancel() -> Self {
        Self::new("✖️ Cancel", "/cancel")
    }

    pub fn skip() -> Self {
        Self::new("⏭ Skip", "/skip")
    }
}

/// Outbound message with optional rows of choices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub text: String,
    pub choices: Vec<Vec<Choice>>,
}

impl Prompt {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            choices: Vec::new(),
        }
    }

    /// Append a row of choices.
    pub fn row(mut self, row: Vec<Choice>) -> Self {
        if !row.is_empty() {
            self.choices.push(row);
        }
        self
    }

    /// Append a single choice on its own row.
    pub fn choice(self, choice: Choice) -> Self {
        self.row(vec![choice])
    }

    /// Lay `choices` out `per_row` at a time.
    pub fn grid(mut self, choices: Vec<Choice>, per_row: usize) -> Self {
        let per_row = per_row.max(1);
        let mut iter = choices.into_iter().peekable();
        while iter.peek().is_some() {
            self.choices.push(iter.by_ref().take(per_row).collect());
        }
        self
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.choices.iter().flatten().map(|c| c.token.as_str())
    }

    pub fn has_token(&self, token: &str) -> bool {
        self.tokens().any(|t| t == token)
    }
}

/// An event received from a channel, with the sender's identity.
#[derive(Debug, Clone)]
pub struct IncomingEvent {
    pub id: Uuid,
    /// Name of the channel that delivered it.
    pub channel: String,
    /// Stable external identity of the sender.
    pub user_id: String,
    pub user_name: Option<String>,
    pub event: Event,
    /// Channel-specific routing data (e.g. Telegram chat id).
    pub metadata: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl IncomingEvent {
    pub fn new(channel: impl Into<String>, user_id: impl Into<String>, event: Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            user_id: user_id.into(),
            user_name: None,
            event,
            metadata: serde_json::Value::Null,
            received_at: Utc::now(),
        }
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Stream of inbound events produced by a channel.
pub type EventStream = Pin<Box<dyn Stream<Item = IncomingEvent> + Send>>;

/// Outbound side used by the workflow engine. Only opaque user ids cross
/// this boundary.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_prompt(&self, user_id: &str, prompt: &Prompt) -> Result<(), ChannelError>;

    /// Replace the last prompt sent to the user, or send a new one if the
    /// transport cannot edit.
    async fn edit_last_prompt(&self, user_id: &str, prompt: &Prompt) -> Result<(), ChannelError>;

    async fn send_notice(&self, user_id: &str, text: &str) -> Result<(), ChannelError>;
}

/// A concrete messaging surface (Telegram, stdin).
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Begin receiving events.
    async fn start(&self) -> Result<EventStream, ChannelError>;

    async fn send_prompt(&self, user_id: &str, prompt: &Prompt) -> Result<(), ChannelError>;

    async fn edit_last_prompt(&self, user_id: &str, prompt: &Prompt) -> Result<(), ChannelError> {
        self.send_prompt(user_id, prompt).await
    }

    async fn send_notice(&self, user_id: &str, text: &str) -> Result<(), ChannelError>;

    async fn health_check(&self) -> Result<(), ChannelError>;

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_splits_rows() {
        let choices = (1..=5).map(|i| Choice::new(i.to_string(), format!("n:{i}")));
        let prompt = Prompt::new("pick").grid(choices.collect(), 2);
        assert_eq!(prompt.choices.len(), 3);
        assert_eq!(prompt.choices[2].len(), 1);
    }

    #[test]
    fn empty_rows_are_dropped() {
        let prompt = Prompt::new("x").row(Vec::new()).choice(Choice::cancel());
        assert_eq!(prompt.choices.len(), 1);
        assert!(prompt.has_token("/cancel"));
    }
}
