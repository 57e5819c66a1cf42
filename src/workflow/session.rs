//! Per-user sessions and the volatile store holding them.
//!
//! `Session` methods are pure bookkeeping: they never render or call a
//! handler. Control flow lives in the router.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::error::WorkflowError;
use crate::scenes::{WorkflowData, WorkflowId};
use crate::workflow::state::StateName;

/// The workflow a session is currently in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveWorkflow {
    pub workflow: WorkflowId,
    pub state: StateName,
    pub data: WorkflowData,
}

/// Volatile conversation state of one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    /// Workflow, state and bag are set together or not at all.
    pub active: Option<ActiveWorkflow>,
    /// Caller to re-enter when the active workflow finishes or is cancelled.
    pub return_to: Option<WorkflowId>,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            active: None,
            return_to: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    pub fn workflow(&self) -> Option<WorkflowId> {
        self.active.as_ref().map(|a| a.workflow)
    }

    pub fn state(&self) -> Option<&StateName> {
        self.active.as_ref().map(|a| &a.state)
    }

    /// Replace the active workflow with a fresh one. The return slot is kept.
    pub fn enter(&mut self, workflow: WorkflowId, state: StateName, data: WorkflowData) {
        self.active = Some(ActiveWorkflow {
            workflow,
            state,
            data,
        });
    }

    /// Clear the active workflow and hand back the pending return, if any.
    pub fn leave(&mut self) -> Option<WorkflowId> {
        self.active = None;
        self.return_to.take()
    }

    /// Clear everything, return slot included.
    pub fn abort(&mut self) {
        self.active = None;
        self.return_to = None;
    }

    pub fn set_state(&mut self, state: StateName) -> Result<(), WorkflowError> {
        match self.active.as_mut() {
            Some(active) => {
                active.state = state;
                Ok(())
            }
            None => Err(WorkflowError::UnknownState {
                workflow: "idle".into(),
                state: state.to_string(),
            }),
        }
    }

    /// Record `caller` as the return target. Only one level is tracked, so a
    /// second pending return is refused instead of overwriting the first.
    pub fn set_return(
        &mut self,
        caller: WorkflowId,
        callee: WorkflowId,
    ) -> Result<(), WorkflowError> {
        if let Some(pending) = self.return_to {
            return Err(WorkflowError::NestingTooDeep {
                caller: pending.to_string(),
                callee: callee.to_string(),
            });
        }
        self.return_to = Some(caller);
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            user_id: self.user_id.clone(),
            workflow: self.workflow(),
            state: self.state().cloned(),
            return_to: self.return_to,
        }
    }
}

/// Read-only view served by the HTTP API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub user_id: String,
    pub workflow: Option<WorkflowId>,
    pub state: Option<StateName>,
    pub return_to: Option<WorkflowId>,
}

/// In-memory session map. Each session sits behind its own mutex so one
/// user's events run to completion without blocking anyone else.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing session or a fresh idle one. Never fails.
    pub async fn get(&self, user_id: &str) -> Arc<Mutex<Session>> {
        if let Some(session) = self.sessions.read().await.get(user_id) {
            return Arc::clone(session);
        }
        let mut sessions = self.sessions.write().await;
        Arc::clone(
            sessions
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Session::new(user_id)))),
        )
    }

    /// Snapshot of a known session; `None` if the user never spoke.
    pub async fn snapshot(&self, user_id: &str) -> Option<SessionSnapshot> {
        let session = self.sessions.read().await.get(user_id).cloned()?;
        let guard = session.lock().await;
        Some(guard.snapshot())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenes::report::ReportData;

    fn bag() -> WorkflowData {
        WorkflowData::Report(ReportData::default())
    }

    #[test]
    fn enter_then_leave_is_idle() {
        let mut session = Session::new("u1");
        session.enter(WorkflowId::Report, StateName::new("choose_kind"), bag());
        assert!(!session.is_idle());
        assert_eq!(session.leave(), None);
        assert!(session.is_idle());
        assert!(session.state().is_none());
    }

    #[test]
    fn leave_hands_back_the_return_slot_once() {
        let mut session = Session::new("u1");
        session
            .set_return(WorkflowId::TaskExecution, WorkflowId::Checklist)
            .unwrap();
        session.enter(WorkflowId::Checklist, StateName::new("item"), bag());
        assert_eq!(session.leave(), Some(WorkflowId::TaskExecution));
        assert_eq!(session.return_to, None);
    }

    #[test]
    fn second_return_is_refused() {
        let mut session = Session::new("u1");
        session
            .set_return(WorkflowId::TaskExecution, WorkflowId::Checklist)
            .unwrap();
        let err = session
            .set_return(WorkflowId::Checklist, WorkflowId::Report)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NestingTooDeep { .. }));
        assert_eq!(session.return_to, Some(WorkflowId::TaskExecution));
    }

    #[test]
    fn abort_clears_return_slot() {
        let mut session = Session::new("u1");
        session
            .set_return(WorkflowId::TaskExecution, WorkflowId::Checklist)
            .unwrap();
        session.enter(WorkflowId::Checklist, StateName::new("item"), bag());
        session.abort();
        assert!(session.is_idle());
        assert_eq!(session.return_to, None);
    }

    #[test]
    fn set_state_requires_active_workflow() {
        let mut session = Session::new("u1");
        assert!(session.set_state(StateName::new("confirm")).is_err());
    }

    #[tokio::test]
    async fn store_returns_same_session() {
        let store = SessionStore::new();
        let a = store.get("u1").await;
        let b = store.get("u1").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len().await, 1);
        assert!(store.snapshot("nobody").await.is_none());
        assert_eq!(store.snapshot("u1").await.unwrap().workflow, None);
    }
}
