//! Main loop: consumes the merged channel stream and hands every event to
//! the workflow router.
//!
//! Each user gets a lane (an mpsc queue drained by its own task), so one
//! user's events are processed in arrival order and to completion while
//! different users proceed concurrently. A lane that stays empty for
//! `LANE_IDLE` closes itself and is reopened by the next event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::channels::{EventStream, IncomingEvent};
use crate::store::traits::Repository;
use crate::workflow::context::Actor;
use crate::workflow::router::{Dispatch, EventRouter};

/// How long a lane worker waits for its next event before closing.
pub const LANE_IDLE: Duration = Duration::from_secs(600);

type Lanes = Arc<Mutex<HashMap<String, Lane>>>;

struct Lane {
    tx: mpsc::UnboundedSender<IncomingEvent>,
    worker: JoinHandle<()>,
}

pub struct Dispatcher {
    router: Arc<EventRouter>,
    repo: Arc<dyn Repository>,
    lanes: Lanes,
    lane_idle: Duration,
}

impl Dispatcher {
    pub fn new(router: Arc<EventRouter>, repo: Arc<dyn Repository>) -> Self {
        Self {
            router,
            repo,
            lanes: Arc::new(Mutex::new(HashMap::new())),
            lane_idle: LANE_IDLE,
        }
    }

    pub fn with_lane_idle(mut self, idle: Duration) -> Self {
        self.lane_idle = idle;
        self
    }

    /// Run until every channel stream ends or Ctrl+C, then let queued
    /// events finish.
    pub async fn run(&self, mut stream: EventStream) {
        tracing::info!("Dispatcher ready and listening");

        loop {
            let event = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl+C received, shutting down...");
                    break;
                }
                event = stream.next() => match event {
                    Some(e) => e,
                    None => {
                        tracing::info!("All channel streams ended, shutting down...");
                        break;
                    }
                },
            };
            self.submit(event).await;
        }

        self.drain().await;
    }

    /// Queue an event on its user's lane, opening the lane if needed.
    pub async fn submit(&self, event: IncomingEvent) {
        let mut lanes = self.lanes.lock().await;
        let user_id = event.user_id.clone();

        let event = match lanes.get(&user_id) {
            Some(lane) => match lane.tx.send(event) {
                Ok(()) => return,
                // Worker gone; reopen below.
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let lane = self.open_lane(&user_id);
        if lane.tx.send(event).is_err() {
            tracing::error!(user_id, "Fresh lane rejected an event");
        }
        lanes.insert(user_id, lane);
    }

    fn open_lane(&self, user_id: &str) -> Lane {
        let (tx, mut rx) = mpsc::unbounded_channel::<IncomingEvent>();
        let router = Arc::clone(&self.router);
        let repo = Arc::clone(&self.repo);
        let lanes = Arc::clone(&self.lanes);
        let idle = self.lane_idle;
        let owner = user_id.to_string();
        tracing::debug!(user_id, "Opening lane");

        let worker = tokio::spawn(async move {
            loop {
                let incoming = match tokio::time::timeout(idle, rx.recv()).await {
                    Ok(Some(incoming)) => incoming,
                    Ok(None) => break,
                    Err(_) => {
                        // Holding the map lock keeps `submit` from queueing
                        // onto a lane that is about to close.
                        let mut open = lanes.lock().await;
                        match rx.try_recv() {
                            Ok(incoming) => incoming,
                            Err(_) => {
                                open.remove(&owner);
                                tracing::debug!(user_id = %owner, "Closing idle lane");
                                break;
                            }
                        }
                    }
                };
                process(router.as_ref(), repo.as_ref(), incoming).await;
            }
        });

        Lane { tx, worker }
    }

    /// Close every lane and wait for queued events to finish.
    pub async fn drain(&self) {
        let lanes: Vec<Lane> = self.lanes.lock().await.drain().map(|(_, l)| l).collect();
        for Lane { tx, worker } in lanes {
            drop(tx);
            if let Err(e) = worker.await {
                tracing::error!("Lane worker panicked: {e}");
            }
        }
    }

    pub async fn lane_count(&self) -> usize {
        self.lanes.lock().await.len()
    }
}

async fn process(router: &EventRouter, repo: &dyn Repository, incoming: IncomingEvent) {
    let actor = resolve_actor(repo, &incoming).await;
    let kind = incoming.event.kind();
    let outcome = router.dispatch(&actor, incoming.event).await;
    match outcome {
        Dispatch::Aborted => tracing::warn!(
            user_id = %actor.user_id,
            channel = %incoming.channel,
            kind,
            "Event aborted the session"
        ),
        other => tracing::debug!(
            user_id = %actor.user_id,
            channel = %incoming.channel,
            kind,
            outcome = ?other,
            "Event processed"
        ),
    }
}

/// The acting user with roles as stored right now. Unknown users, and
/// lookups that fail, yield a guest.
pub async fn resolve_actor(repo: &dyn Repository, incoming: &IncomingEvent) -> Actor {
    let fallback_name = || {
        incoming
            .user_name
            .clone()
            .unwrap_or_else(|| incoming.user_id.clone())
    };
    match repo.find_user_by_external_id(&incoming.user_id).await {
        Ok(Some(user)) => Actor::from_user(&user),
        Ok(None) => Actor::guest(&incoming.user_id, fallback_name()),
        Err(e) => {
            tracing::warn!(user_id = %incoming.user_id, "User lookup failed, treating as guest: {e}");
            Actor::guest(&incoming.user_id, fallback_name())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::RecordingTransport;
    use crate::notify::TransportNotifier;
    use crate::scenes;
    use crate::store::memory::InMemoryRepository;
    use crate::store::model::Role;
    use crate::workflow::event::Event;
    use crate::workflow::session::SessionStore;

    #[tokio::test]
    async fn known_users_carry_their_roles() {
        let repo = InMemoryRepository::new();
        repo.add_user("42", "Olga", &[Role::Operator]).await;
        let actor = resolve_actor(&repo, &IncomingEvent::new("cli", "42", Event::text("x"))).await;
        assert_eq!(actor.roles, vec![Role::Operator]);
        assert!(actor.account_id.is_some());
    }

    #[tokio::test]
    async fn strangers_and_failures_are_guests() {
        let repo = InMemoryRepository::new();
        let incoming = IncomingEvent::new("cli", "7", Event::text("x")).with_user_name("Ivan");
        let actor = resolve_actor(&repo, &incoming).await;
        assert_eq!(actor.roles, vec![Role::Guest]);
        assert_eq!(actor.name, "Ivan");

        repo.add_user("7", "Ivan", &[Role::Admin]).await;
        repo.fail_next(1);
        let actor = resolve_actor(&repo, &incoming).await;
        assert_eq!(actor.roles, vec![Role::Guest]);
    }

    fn dispatcher(repo: Arc<InMemoryRepository>, transport: Arc<RecordingTransport>) -> Dispatcher {
        let router = EventRouter::new(
            scenes::registry(),
            Arc::new(SessionStore::new()),
            repo.clone(),
            transport.clone(),
            Arc::new(TransportNotifier::new(transport)),
            Duration::from_secs(5),
        );
        Dispatcher::new(Arc::new(router), repo).with_lane_idle(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn idle_lanes_close_and_reopen() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.add_user("42", "Olga", &[Role::Operator]).await;
        let transport = Arc::new(RecordingTransport::new());
        let dispatcher = dispatcher(repo, transport.clone());

        dispatcher
            .submit(IncomingEvent::new("cli", "42", Event::command("/help")))
            .await;
        assert_eq!(dispatcher.lane_count().await, 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(dispatcher.lane_count().await, 0);
        assert_eq!(transport.prompts("42").await.len(), 1);

        dispatcher
            .submit(IncomingEvent::new("cli", "42", Event::command("/help")))
            .await;
        dispatcher.drain().await;
        assert_eq!(transport.prompts("42").await.len(), 2);
    }
}
