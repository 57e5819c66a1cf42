//! Fire-and-forget user notifications.
//!
//! A failed notification never fails the workflow step that caused it:
//! callers go through `notify_quietly`, which logs and swallows errors.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::channels::Transport;
use crate::error::ChannelError;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, text: &str) -> Result<(), ChannelError>;
}

/// Delivers notifications as plain notices over the outbound transport.
pub struct TransportNotifier {
    transport: Arc<dyn Transport>,
}

impl TransportNotifier {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Notifier for TransportNotifier {
    async fn notify(&self, user_id: &str, text: &str) -> Result<(), ChannelError> {
        self.transport.send_notice(user_id, text).await
    }
}

/// Send a notification, logging instead of propagating failures.
pub async fn notify_quietly(notifier: &dyn Notifier, user_id: &str, text: &str) {
    match notifier.notify(user_id, text).await {
        Ok(()) => debug!(user_id, "Notification delivered"),
        Err(e) => warn!(user_id, error = %e, "Notification failed; ignoring"),
    }
}
