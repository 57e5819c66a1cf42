//! Fan-in of every channel's events, fan-out of replies to the right one.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::RwLock;

use crate::channels::{Channel, EventStream, Prompt, Transport};
use crate::error::ChannelError;

/// Owns the channels and routes each user's output to the channel that
/// user last spoke on.
pub struct ChannelManager {
    channels: Vec<Arc<dyn Channel>>,
    routes: Arc<RwLock<HashMap<String, usize>>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            routes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn add(&mut self, channel: Box<dyn Channel>) {
        self.channels.push(Arc::from(channel));
    }

    pub fn names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Start every channel and merge their streams. Each event records
    /// its sender's route as it passes through.
    pub async fn start_all(&self) -> Result<EventStream, ChannelError> {
        let mut streams = Vec::with_capacity(self.channels.len());
        for (index, channel) in self.channels.iter().enumerate() {
            let stream = channel.start().await?;
            tracing::info!(channel = channel.name(), "Channel started");
            let routes = Arc::clone(&self.routes);
            streams.push(
                stream
                    .then(move |event| {
                        let routes = Arc::clone(&routes);
                        async move {
                            routes.write().await.insert(event.user_id.clone(), index);
                            event
                        }
                    })
                    .boxed(),
            );
        }
        Ok(Box::pin(futures::stream::select_all(streams)))
    }

    pub async fn shutdown_all(&self) -> Result<(), ChannelError> {
        for channel in &self.channels {
            if let Err(e) = channel.shutdown().await {
                tracing::warn!(channel = channel.name(), "Shutdown failed: {e}");
            }
        }
        Ok(())
    }

    pub async fn health_check_all(&self) -> Vec<(String, Result<(), ChannelError>)> {
        let mut results = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            results.push((channel.name().to_string(), channel.health_check().await));
        }
        results
    }

    /// Channel the user last spoke on, or the first channel for users who
    /// have not spoken yet (e.g. notification targets).
    async fn route(&self, user_id: &str) -> Result<&Arc<dyn Channel>, ChannelError> {
        let index = self.routes.read().await.get(user_id).copied().unwrap_or(0);
        self.channels
            .get(index)
            .ok_or_else(|| ChannelError::UnknownRecipient {
                user_id: user_id.to_string(),
            })
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ChannelManager {
    async fn send_prompt(&self, user_id: &str, prompt: &Prompt) -> Result<(), ChannelError> {
        self.route(user_id).await?.send_prompt(user_id, prompt).await
    }

    async fn edit_last_prompt(&self, user_id: &str, prompt: &Prompt) -> Result<(), ChannelError> {
        self.route(user_id)
            .await?
            .edit_last_prompt(user_id, prompt)
            .await
    }

    async fn send_notice(&self, user_id: &str, text: &str) -> Result<(), ChannelError> {
        self.route(user_id).await?.send_notice(user_id, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::IncomingEvent;
    use crate::workflow::event::Event;
    use tokio::sync::Mutex;

    /// Channel fed from a fixed list, recording what it sends.
    struct FakeChannel {
        name: &'static str,
        inbound: Mutex<Vec<IncomingEvent>>,
        sent: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl FakeChannel {
        fn new(name: &'static str, users: &[&str]) -> (Self, Arc<Mutex<Vec<(String, String)>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            let inbound = users
                .iter()
                .map(|u| IncomingEvent::new(name, *u, Event::text("hi")))
                .collect();
            (
                Self {
                    name,
                    inbound: Mutex::new(inbound),
                    sent: Arc::clone(&sent),
                },
                sent,
            )
        }
    }

    #[async_trait]
    impl Channel for FakeChannel {
        fn name(&self) -> &str {
            self.name
        }

        async fn start(&self) -> Result<EventStream, ChannelError> {
            let events = std::mem::take(&mut *self.inbound.lock().await);
            Ok(Box::pin(futures::stream::iter(events)))
        }

        async fn send_prompt(&self, user_id: &str, prompt: &Prompt) -> Result<(), ChannelError> {
            self.sent
                .lock()
                .await
                .push((user_id.to_string(), prompt.text.clone()));
            Ok(())
        }

        async fn send_notice(&self, user_id: &str, text: &str) -> Result<(), ChannelError> {
            self.sent
                .lock()
                .await
                .push((user_id.to_string(), text.to_string()));
            Ok(())
        }

        async fn health_check(&self) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn replies_follow_the_senders_channel() {
        let (a, sent_a) = FakeChannel::new("a", &["alice"]);
        let (b, sent_b) = FakeChannel::new("b", &["bob"]);
        let mut manager = ChannelManager::new();
        manager.add(Box::new(a));
        manager.add(Box::new(b));

        let mut stream = manager.start_all().await.unwrap();
        let mut seen = 0;
        while stream.next().await.is_some() {
            seen += 1;
        }
        assert_eq!(seen, 2);

        manager.send_notice("bob", "to bob").await.unwrap();
        manager.send_notice("carol", "to carol").await.unwrap();
        assert_eq!(
            *sent_b.lock().await,
            vec![("bob".to_string(), "to bob".to_string())]
        );
        // Unknown users fall back to the first channel.
        assert_eq!(
            *sent_a.lock().await,
            vec![("carol".to_string(), "to carol".to_string())]
        );
    }

    #[tokio::test]
    async fn no_channels_is_an_unknown_recipient() {
        let manager = ChannelManager::new();
        assert!(matches!(
            manager.send_notice("x", "y").await,
            Err(ChannelError::UnknownRecipient { .. })
        ));
    }
}
