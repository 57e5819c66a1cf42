//! Cross-workflow navigation: entering, leaving, returning to a caller and
//! applying handler transitions.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::WorkflowError;
use crate::scenes::{WorkflowData, WorkflowId};
use crate::workflow::context::{Actor, RenderMode, WorkflowContext};
use crate::workflow::definition::{Workflow, WorkflowDefinition};
use crate::workflow::role::{self, DENIAL_NOTICE};
use crate::workflow::router::{CANCELLED_NOTICE, Dispatch, EventRouter};
use crate::workflow::session::Session;
use crate::workflow::state::StateName;
use crate::workflow::transition::{Params, Transition};

fn ensure_state(def: &WorkflowDefinition, state: &StateName) -> Result<(), WorkflowError> {
    if def.has_state(state.as_str()) {
        Ok(())
    } else {
        Err(WorkflowError::UnknownState {
            workflow: def.id.to_string(),
            state: state.to_string(),
        })
    }
}

impl EventRouter {
    /// Enter `id` with a fresh bag seeded from `params` and render its
    /// initial state. The return slot is left untouched.
    pub(crate) async fn enter(
        &self,
        session: &mut Session,
        actor: &Actor,
        id: WorkflowId,
        params: Params,
    ) -> Result<Dispatch, WorkflowError> {
        let workflow = self.workflow(id)?;
        let def = workflow.definition();
        let ctx = self.context(actor, RenderMode::Send);

        if !role::check(&actor.roles, def.roles).is_allowed() {
            info!(user_id = %actor.user_id, workflow = %id, "Workflow entry denied");
            session.abort();
            ctx.notice(DENIAL_NOTICE).await?;
            return Ok(Dispatch::Denied);
        }

        let data = workflow.init(&ctx, params).await?;
        let state = workflow.initial_state(&data);
        ensure_state(def, &state)?;

        workflow.render(&ctx, &state, &data).await?;
        info!(user_id = %actor.user_id, workflow = %id, state = %state, "Entered workflow");
        session.enter(id, state, data);
        Ok(Dispatch::Entered(id))
    }

    /// Leave the active workflow; re-enter the pending caller with `params`
    /// if there is one.
    pub(crate) async fn leave(
        &self,
        session: &mut Session,
        actor: &Actor,
        params: Params,
    ) -> Result<Dispatch, WorkflowError> {
        let finished = session.workflow();
        match session.leave() {
            Some(caller) => {
                debug!(
                    user_id = %actor.user_id,
                    from = ?finished,
                    to = %caller,
                    "Returning to calling workflow"
                );
                self.enter(session, actor, caller, params).await
            }
            None => {
                info!(user_id = %actor.user_id, workflow = ?finished, "Workflow left");
                Ok(Dispatch::Left)
            }
        }
    }

    pub(crate) async fn cancel(
        &self,
        session: &mut Session,
        actor: &Actor,
        workflow: &Arc<dyn Workflow>,
    ) -> Result<Dispatch, WorkflowError> {
        let params = session
            .active
            .as_ref()
            .map(|a| workflow.cancel_params(&a.data))
            .unwrap_or_default();
        info!(
            user_id = %actor.user_id,
            workflow = %workflow.definition().id,
            state = ?session.state(),
            "Workflow cancelled"
        );
        self.context(actor, RenderMode::Send)
            .notice(CANCELLED_NOTICE)
            .await?;
        self.leave(session, actor, params).await?;
        Ok(Dispatch::Cancelled)
    }

    /// Apply a handler's transition. `draft` is the handler's edited copy of
    /// the bag; it replaces the stored bag only for committing transitions.
    pub(crate) async fn apply(
        &self,
        session: &mut Session,
        actor: &Actor,
        workflow: &Arc<dyn Workflow>,
        transition: Transition,
        draft: WorkflowData,
    ) -> Result<Dispatch, WorkflowError> {
        let def = workflow.definition();
        let ctx = self.context(actor, RenderMode::Send);

        if transition.commits()
            && let Some(active) = session.active.as_mut()
        {
            active.data = draft;
        }

        match transition {
            Transition::Stay => {
                self.render_current(session, &ctx.with_mode(RenderMode::Edit), workflow)
                    .await?;
                Ok(Dispatch::Handled)
            }
            Transition::Retry(notice) => {
                ctx.notice(&notice).await?;
                self.render_current(session, &ctx, workflow).await?;
                Ok(Dispatch::Handled)
            }
            Transition::Goto(state) => {
                ensure_state(def, &state)?;
                session.set_state(state)?;
                self.render_current(session, &ctx, workflow).await?;
                Ok(Dispatch::Handled)
            }
            Transition::Back { state, notice } => {
                ensure_state(def, &state)?;
                ctx.notice(&notice).await?;
                session.set_state(state)?;
                self.render_current(session, &ctx, workflow).await?;
                Ok(Dispatch::Handled)
            }
            Transition::Finish(params) => self.leave(session, actor, params).await,
            Transition::Switch(target, params) => {
                debug!(user_id = %actor.user_id, from = %def.id, to = %target, "Switching workflow");
                session.abort();
                self.enter(session, actor, target, params).await
            }
            Transition::Invoke(target, params) => {
                session.set_return(def.id, target)?;
                debug!(user_id = %actor.user_id, caller = %def.id, callee = %target, "Invoking sub-workflow");
                self.enter(session, actor, target, params).await
            }
        }
    }

    async fn render_current(
        &self,
        session: &Session,
        ctx: &WorkflowContext<'_>,
        workflow: &Arc<dyn Workflow>,
    ) -> Result<(), WorkflowError> {
        let active = session
            .active
            .as_ref()
            .ok_or_else(|| WorkflowError::UnknownState {
                workflow: workflow.definition().id.to_string(),
                state: "idle".into(),
            })?;
        workflow.render(ctx, &active.state, &active.data).await
    }
}
