//! In-memory transport that records everything sent, for tests and dry runs.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::channels::{Prompt, Transport};
use crate::error::ChannelError;

/// One captured outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Prompt { user_id: String, prompt: Prompt },
    Edit { user_id: String, prompt: Prompt },
    Notice { user_id: String, text: String },
}

impl Outbound {
    pub fn user_id(&self) -> &str {
        match self {
            Self::Prompt { user_id, .. } | Self::Edit { user_id, .. } | Self::Notice { user_id, .. } => {
                user_id
            }
        }
    }

    /// Prompt carried by a send or an edit.
    pub fn prompt(&self) -> Option<&Prompt> {
        match self {
            Self::Prompt { prompt, .. } | Self::Edit { prompt, .. } => Some(prompt),
            Self::Notice { .. } => None,
        }
    }
}

#[derive(Default)]
pub struct RecordingTransport {
    outbound: Mutex<Vec<Outbound>>,
    fail: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail until switched back.
    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), ChannelError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChannelError::SendFailed {
                name: "recording".into(),
                reason: "sends disabled".into(),
            });
        }
        Ok(())
    }

    pub async fn outbound(&self) -> Vec<Outbound> {
        self.outbound.lock().await.clone()
    }

    pub async fn outbound_for(&self, user_id: &str) -> Vec<Outbound> {
        self.outbound
            .lock()
            .await
            .iter()
            .filter(|o| o.user_id() == user_id)
            .cloned()
            .collect()
    }

    pub async fn notices(&self, user_id: &str) -> Vec<String> {
        self.outbound
            .lock()
            .await
            .iter()
            .filter_map(|o| match o {
                Outbound::Notice { user_id: u, text } if u == user_id => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Prompts sent or edited for the user, in order.
    pub async fn prompts(&self, user_id: &str) -> Vec<Prompt> {
        self.outbound
            .lock()
            .await
            .iter()
            .filter(|o| o.user_id() == user_id)
            .filter_map(|o| o.prompt().cloned())
            .collect()
    }

    /// What the user currently sees: the most recent prompt.
    pub async fn last_prompt(&self, user_id: &str) -> Option<Prompt> {
        self.prompts(user_id).await.pop()
    }

    pub async fn last_notice(&self, user_id: &str) -> Option<String> {
        self.notices(user_id).await.pop()
    }

    pub async fn clear(&self) {
        self.outbound.lock().await.clear();
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_prompt(&self, user_id: &str, prompt: &Prompt) -> Result<(), ChannelError> {
        self.check()?;
        self.outbound.lock().await.push(Outbound::Prompt {
            user_id: user_id.to_string(),
            prompt: prompt.clone(),
        });
        Ok(())
    }

    async fn edit_last_prompt(&self, user_id: &str, prompt: &Prompt) -> Result<(), ChannelError> {
        self.check()?;
        self.outbound.lock().await.push(Outbound::Edit {
            user_id: user_id.to_string(),
            prompt: prompt.clone(),
        });
        Ok(())
    }

    async fn send_notice(&self, user_id: &str, text: &str) -> Result<(), ChannelError> {
        self.check()?;
        self.outbound.lock().await.push(Outbound::Notice {
            user_id: user_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}
