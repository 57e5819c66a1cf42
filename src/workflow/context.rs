//! Everything a handler may touch while processing one event.

use serde::Serialize;

use crate::channels::{Prompt, Transport};
use crate::error::WorkflowError;
use crate::notify::{Notifier, notify_quietly};
use crate::store::model::{EntityId, Role, User};
use crate::store::traits::Repository;

/// The user an event came from, with roles resolved for this event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Actor {
    /// External (transport) identity.
    pub user_id: String,
    pub name: String,
    /// Repository account, absent for unknown users.
    pub account_id: Option<EntityId>,
    pub roles: Vec<Role>,
}

impl Actor {
    /// An unregistered user holding only the guest role.
    pub fn guest(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            account_id: None,
            roles: vec![Role::Guest],
        }
    }

    pub fn from_user(user: &User) -> Self {
        Self {
            user_id: user.external_id.clone(),
            name: user.name.clone(),
            account_id: Some(user.id),
            roles: user.roles.clone(),
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Repository id of the acting user; required by every record a
    /// workflow creates.
    pub fn account(&self) -> Result<EntityId, WorkflowError> {
        self.account_id
            .ok_or_else(|| WorkflowError::UnknownActor(self.user_id.clone()))
    }
}

/// How `prompt` delivers: a new message, or an in-place edit of the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Send,
    Edit,
}

pub struct WorkflowContext<'a> {
    pub actor: &'a Actor,
    pub repo: &'a dyn Repository,
    transport: &'a dyn Transport,
    notifier: &'a dyn Notifier,
    mode: RenderMode,
}

impl<'a> WorkflowContext<'a> {
    pub fn new(
        actor: &'a Actor,
        repo: &'a dyn Repository,
        transport: &'a dyn Transport,
        notifier: &'a dyn Notifier,
        mode: RenderMode,
    ) -> Self {
        Self {
            actor,
            repo,
            transport,
            notifier,
            mode,
        }
    }

    /// Same context with a different render mode.
    pub fn with_mode(&self, mode: RenderMode) -> WorkflowContext<'a> {
        WorkflowContext { mode, ..*self }
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub async fn prompt(&self, prompt: Prompt) -> Result<(), WorkflowError> {
        let user_id = self.actor.user_id.as_str();
        match self.mode {
            RenderMode::Send => self.transport.send_prompt(user_id, &prompt).await?,
            RenderMode::Edit => self.transport.edit_last_prompt(user_id, &prompt).await?,
        }
        Ok(())
    }

    pub async fn notice(&self, text: &str) -> Result<(), WorkflowError> {
        self.transport
            .send_notice(&self.actor.user_id, text)
            .await
            .map_err(WorkflowError::from)
    }

    /// Notify another user. Failures are logged and swallowed.
    pub async fn notify(&self, user: &User, text: &str) {
        notify_quietly(self.notifier, &user.external_id, text).await;
    }
}
