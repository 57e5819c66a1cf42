//! Static workflow definitions and the `Workflow` trait implemented by scenes.
//!
//! A definition lists, per state, the closed set of inputs the state accepts.
//! The router resolves an event against that table; anything not declared
//! is ignored.

use async_trait::async_trait;

use crate::error::WorkflowError;
use crate::scenes::{WorkflowData, WorkflowId};
use crate::store::model::{EntityId, Role};
use crate::workflow::context::WorkflowContext;
use crate::workflow::event::{Event, MediaKind};
use crate::workflow::state::StateName;
use crate::workflow::transition::{Params, Transition};

/// Command every state accepts unless it explicitly opts out.
pub const CANCEL: &str = "cancel";
/// Command accepted by states with an optional answer.
pub const SKIP: &str = "skip";

/// One kind of input a state declares interest in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    /// Exact action token, e.g. `done`.
    Action(&'static str),
    /// Entity token `<prefix>:<id>`, e.g. `ing:7`.
    Entity(&'static str),
    Text,
    Media,
    /// Workflow-global command such as `cancel` or `skip`.
    Command(&'static str),
}

/// Accepted inputs of a single state.
#[derive(Debug)]
pub struct StateSpec {
    pub name: &'static str,
    pub accepts: &'static [Accept],
}

impl StateSpec {
    pub fn accepts_command(&self, name: &str) -> bool {
        self.accepts
            .iter()
            .any(|a| matches!(a, Accept::Command(c) if *c == name))
    }
}

/// An event resolved against a state's accept table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Action(String),
    Entity { prefix: String, id: EntityId },
    Text(String),
    Media { kind: MediaKind, reference: String },
    Command(&'static str),
}

impl Input {
    pub fn is_action(&self, token: &str) -> bool {
        matches!(self, Self::Action(t) if t == token)
    }

    pub fn is_command(&self, name: &str) -> bool {
        matches!(self, Self::Command(c) if *c == name)
    }

    /// Entity id if this is an entity token with the given prefix.
    pub fn entity(&self, prefix: &str) -> Option<EntityId> {
        match self {
            Self::Entity { prefix: p, id } if p == prefix => Some(*id),
            _ => None,
        }
    }
}

/// Process-wide, read-only description of a workflow.
#[derive(Debug)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    /// Entry command without the slash.
    pub command: &'static str,
    pub title: &'static str,
    /// OR-semantics allowlist, checked at entry and on every event.
    pub roles: &'static [Role],
    pub initial: &'static str,
    pub states: &'static [StateSpec],
}

impl WorkflowDefinition {
    pub fn state(&self, name: &str) -> Option<&StateSpec> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.state(name).is_some()
    }

    pub fn declares_cancel(&self, state: &str) -> bool {
        self.state(state).is_some_and(|s| s.accepts_command(CANCEL))
    }

    /// Resolve `event` for `state`. Priority: exact action, entity pattern,
    /// text, media, declared command. `None` means the event is ignored.
    pub fn resolve(&self, state: &str, event: &Event) -> Option<Input> {
        let spec = self.state(state)?;
        match event {
            Event::Action { token } => {
                let exact = spec
                    .accepts
                    .iter()
                    .any(|a| matches!(a, Accept::Action(t) if *t == token.as_str()));
                if exact {
                    return Some(Input::Action(token.clone()));
                }
                let (prefix, raw_id) = token.split_once(':')?;
                let id: EntityId = raw_id.parse().ok()?;
                spec.accepts
                    .iter()
                    .any(|a| matches!(a, Accept::Entity(p) if *p == prefix))
                    .then(|| Input::Entity {
                        prefix: prefix.to_string(),
                        id,
                    })
            }
            Event::Text { content } => spec
                .accepts
                .contains(&Accept::Text)
                .then(|| Input::Text(content.clone())),
            Event::Media { kind, reference } => {
                spec.accepts.contains(&Accept::Media).then(|| Input::Media {
                    kind: *kind,
                    reference: reference.clone(),
                })
            }
            Event::Command { name } => spec.accepts.iter().find_map(|a| match a {
                Accept::Command(c) if *c == name.as_str() => Some(Input::Command(*c)),
                _ => None,
            }),
        }
    }
}

/// A guided dialogue. Implementations are stateless; everything they
/// accumulate lives in their `WorkflowData` variant.
#[async_trait]
pub trait Workflow: Send + Sync {
    fn definition(&self) -> &'static WorkflowDefinition;

    /// Build a fresh data bag, seeded from `params`.
    async fn init(
        &self,
        ctx: &WorkflowContext<'_>,
        params: Params,
    ) -> Result<WorkflowData, WorkflowError>;

    fn initial_state(&self, _data: &WorkflowData) -> StateName {
        StateName::new(self.definition().initial)
    }

    /// Send the prompt of `state`.
    async fn render(
        &self,
        ctx: &WorkflowContext<'_>,
        state: &StateName,
        data: &WorkflowData,
    ) -> Result<(), WorkflowError>;

    /// Consume a resolved input and decide the next step.
    async fn handle(
        &self,
        ctx: &WorkflowContext<'_>,
        state: &StateName,
        data: &mut WorkflowData,
        input: Input,
    ) -> Result<Transition, WorkflowError>;

    /// Parameters handed to the return workflow when this one is cancelled.
    fn cancel_params(&self, _data: &WorkflowData) -> Params {
        Params::default()
    }
}
