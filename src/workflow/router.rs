//! Event router: loads the user's session, applies the role guard, resolves
//! the event against the current state and runs the matching handler.
//!
//! Events for one user are serialized by the session mutex; the whole
//! processing of an event is bounded by `handler_timeout`. Any error or
//! timeout evicts the user to idle with a single failure notice.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::channels::{Prompt, Transport};
use crate::error::WorkflowError;
use crate::notify::Notifier;
use crate::scenes::WorkflowId;
use crate::store::traits::Repository;
use crate::workflow::context::{Actor, RenderMode, WorkflowContext};
use crate::workflow::definition::{CANCEL, Workflow};
use crate::workflow::event::Event;
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::role::{self, DENIAL_NOTICE};
use crate::workflow::session::{Session, SessionStore};
use crate::workflow::transition::Params;

pub const FAILURE_NOTICE: &str =
    "⚠️ Something went wrong and the operation was stopped. Please start again.";
pub const CANCELLED_NOTICE: &str = "❎ Cancelled.";
pub const NOTHING_TO_CANCEL: &str = "Nothing to cancel.";

/// What the router did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// No handler matched; nothing changed.
    Ignored,
    /// A workflow was entered (fresh, or by returning to a caller).
    Entered(WorkflowId),
    /// Handled within the active workflow, or an idle-session command.
    Handled,
    /// The workflow finished and the session is idle.
    Left,
    Cancelled,
    Denied,
    /// Unrecoverable failure; the session was reset to idle.
    Aborted,
}

pub struct EventRouter {
    pub(crate) registry: WorkflowRegistry,
    sessions: Arc<SessionStore>,
    repo: Arc<dyn Repository>,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn Notifier>,
    handler_timeout: Duration,
}

impl EventRouter {
    pub fn new(
        registry: WorkflowRegistry,
        sessions: Arc<SessionStore>,
        repo: Arc<dyn Repository>,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
        handler_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            sessions,
            repo,
            transport,
            notifier,
            handler_timeout,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    pub(crate) fn context<'a>(&'a self, actor: &'a Actor, mode: RenderMode) -> WorkflowContext<'a> {
        WorkflowContext::new(
            actor,
            self.repo.as_ref(),
            self.transport.as_ref(),
            self.notifier.as_ref(),
            mode,
        )
    }

    pub(crate) fn workflow(&self, id: WorkflowId) -> Result<Arc<dyn Workflow>, WorkflowError> {
        self.registry
            .get(id)
            .ok_or_else(|| WorkflowError::UnknownWorkflow(id.to_string()))
    }

    /// Process one event for `actor` to completion.
    pub async fn dispatch(&self, actor: &Actor, event: Event) -> Dispatch {
        let session = self.sessions.get(&actor.user_id).await;
        let mut session = session.lock().await;

        let outcome =
            tokio::time::timeout(self.handler_timeout, self.process(&mut session, actor, &event))
                .await;

        match outcome {
            Ok(Ok(dispatch)) => dispatch,
            Ok(Err(e)) => self.fail(&mut session, actor, e).await,
            Err(_) => {
                self.fail(&mut session, actor, WorkflowError::Timeout(self.handler_timeout))
                    .await
            }
        }
    }

    async fn process(
        &self,
        session: &mut Session,
        actor: &Actor,
        event: &Event,
    ) -> Result<Dispatch, WorkflowError> {
        // Entry commands are honoured in any state.
        if let Event::Command { name } = event
            && let Some(workflow) = self.registry.by_command(name)
        {
            return self.start(session, actor, workflow).await;
        }

        let Some(active) = session.active.as_ref() else {
            return self.idle(actor, event).await;
        };

        let workflow = self.workflow(active.workflow)?;
        let def = workflow.definition();

        if !role::check(&actor.roles, def.roles).is_allowed() {
            info!(
                user_id = %actor.user_id,
                workflow = %def.id,
                "Role no longer permitted; leaving workflow"
            );
            session.abort();
            self.context(actor, RenderMode::Send)
                .notice(DENIAL_NOTICE)
                .await?;
            return Ok(Dispatch::Denied);
        }

        let state = active.state.clone();

        if event.is_command(CANCEL) && def.declares_cancel(state.as_str()) {
            return self.cancel(session, actor, &workflow).await;
        }

        let Some(input) = def.resolve(state.as_str(), event) else {
            debug!(
                user_id = %actor.user_id,
                workflow = %def.id,
                state = %state,
                kind = event.kind(),
                "Ignored event with no matching handler"
            );
            return Ok(Dispatch::Ignored);
        };

        let mut draft = active.data.clone();
        let ctx = self.context(actor, RenderMode::Send);
        let transition = workflow.handle(&ctx, &state, &mut draft, input).await?;
        debug!(
            user_id = %actor.user_id,
            workflow = %def.id,
            state = %state,
            ?transition,
            "Handler finished"
        );
        self.apply(session, actor, &workflow, transition, draft)
            .await
    }

    async fn start(
        &self,
        session: &mut Session,
        actor: &Actor,
        workflow: Arc<dyn Workflow>,
    ) -> Result<Dispatch, WorkflowError> {
        let def = workflow.definition();
        if !role::check(&actor.roles, def.roles).is_allowed() {
            info!(user_id = %actor.user_id, workflow = %def.id, "Workflow entry denied");
            self.context(actor, RenderMode::Send)
                .notice(DENIAL_NOTICE)
                .await?;
            return Ok(Dispatch::Denied);
        }
        if let Some(previous) = session.workflow() {
            debug!(
                user_id = %actor.user_id,
                previous = %previous,
                next = %def.id,
                "Leaving active workflow for new entry command"
            );
        }
        session.abort();
        self.enter(session, actor, def.id, Params::default()).await
    }

    async fn idle(&self, actor: &Actor, event: &Event) -> Result<Dispatch, WorkflowError> {
        let ctx = self.context(actor, RenderMode::Send);
        match event {
            Event::Command { name } if name == "start" || name == "help" => {
                ctx.prompt(self.help(actor)).await?;
                Ok(Dispatch::Handled)
            }
            Event::Command { name } if name == CANCEL => {
                ctx.notice(NOTHING_TO_CANCEL).await?;
                Ok(Dispatch::Handled)
            }
            _ => {
                debug!(user_id = %actor.user_id, kind = event.kind(), "Ignored event while idle");
                Ok(Dispatch::Ignored)
            }
        }
    }

    /// Entry commands the actor may use.
    fn help(&self, actor: &Actor) -> Prompt {
        let available = self.registry.available_to(&actor.roles);
        if available.is_empty() {
            return Prompt::new(format!(
                "👋 Hi, {}! You don't have access to any section yet.\n\
                 Ask an administrator to grant you a role. Your id: {}",
                actor.name, actor.user_id
            ));
        }
        let lines: Vec<String> = available
            .iter()
            .map(|d| format!("/{} — {}", d.command, d.title))
            .collect();
        Prompt::new(format!(
            "👋 Hi, {}! Available commands:\n\n{}\n\n/cancel stops the current dialogue.",
            actor.name,
            lines.join("\n")
        ))
    }

    async fn fail(&self, session: &mut Session, actor: &Actor, err: WorkflowError) -> Dispatch {
        error!(
            user_id = %actor.user_id,
            workflow = ?session.workflow(),
            state = ?session.state(),
            error = %err,
            "Workflow aborted"
        );
        session.abort();
        if let Err(e) = self
            .transport
            .send_notice(&actor.user_id, FAILURE_NOTICE)
            .await
        {
            warn!(user_id = %actor.user_id, error = %e, "Failed to deliver failure notice");
        }
        Dispatch::Aborted
    }
}
