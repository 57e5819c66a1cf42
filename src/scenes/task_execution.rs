//! `/mytasks`: an operator works through their assigned tasks.
//!
//! A single `task` state shows either the list of open tasks or one task
//! with its actions. The checklist runs as a sub-workflow and reports back
//! through `Params`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::channels::{Choice, Prompt};
use crate::error::WorkflowError;
use crate::scenes::common::{self, STALE_NOTICE};
use crate::scenes::{WorkflowData, WorkflowId};
use crate::store::model::{EntityId, Role, Task, TaskStatus};
use crate::workflow::context::WorkflowContext;
use crate::workflow::definition::{Accept, CANCEL, Input, StateSpec, Workflow, WorkflowDefinition};
use crate::workflow::event::MediaKind;
use crate::workflow::state::{StateName, workflow_states};
use crate::workflow::transition::{ChecklistOutcome, Params, Transition};

const TASK: &str = "task";
const START: &str = "start";
const RUN_CHECKLIST: &str = "run_checklist";
const PHOTO: &str = "photo";
const COMPLETE: &str = "complete";
const BACK: &str = "back";

workflow_states! {
    pub enum State {
        Task => "task",
        Photo => "photo",
    }
}

static DEFINITION: WorkflowDefinition = WorkflowDefinition {
    id: WorkflowId::TaskExecution,
    command: "mytasks",
    title: "My tasks",
    roles: &[Role::Admin, Role::Manager, Role::Operator],
    initial: "task",
    states: &[
        StateSpec {
            name: "task",
            accepts: &[
                Accept::Entity(TASK),
                Accept::Action(START),
                Accept::Action(RUN_CHECKLIST),
                Accept::Action(PHOTO),
                Accept::Action(COMPLETE),
                Accept::Action(BACK),
                Accept::Command(CANCEL),
            ],
        },
        StateSpec {
            name: "photo",
            accepts: &[Accept::Media, Accept::Action(BACK), Accept::Command(CANCEL)],
        },
    ],
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutionData {
    /// Task being viewed; `None` shows the list.
    pub task_id: Option<EntityId>,
    /// Result handed back by the checklist sub-workflow.
    pub checklist: Option<ChecklistOutcome>,
    pub photos: Vec<String>,
}

pub struct TaskExecution;

#[async_trait]
impl Workflow for TaskExecution {
    fn definition(&self) -> &'static WorkflowDefinition {
        &DEFINITION
    }

    async fn init(
        &self,
        _ctx: &WorkflowContext<'_>,
        params: Params,
    ) -> Result<WorkflowData, WorkflowError> {
        Ok(WorkflowData::TaskExecution(TaskExecutionData {
            task_id: params.task_id,
            checklist: params.checklist,
            photos: Vec::new(),
        }))
    }

    async fn render(
        &self,
        ctx: &WorkflowContext<'_>,
        state: &StateName,
        data: &WorkflowData,
    ) -> Result<(), WorkflowError> {
        let d = data.task_execution()?;
        let prompt = match State::of(DEFINITION.id, state)? {
            State::Photo => Prompt::new("📷 Send a photo of the work.")
                .row(vec![Choice::new("⬅️ Back", BACK), Choice::cancel()]),
            State::Task => match d.task_id {
                None => list_prompt(ctx).await?,
                Some(id) => match ctx.repo.get_task(id).await? {
                    Some(task) => task_prompt(ctx, &task, d).await?,
                    None => Prompt::new(format!("Task #{id} no longer exists."))
                        .row(vec![Choice::new("⬅️ Back", BACK), Choice::cancel()]),
                },
            },
        };
        ctx.prompt(prompt).await
    }

    async fn handle(
        &self,
        ctx: &WorkflowContext<'_>,
        state: &StateName,
        data: &mut WorkflowData,
        input: Input,
    ) -> Result<Transition, WorkflowError> {
        let d = data.task_execution_mut()?;
        if input.is_action(BACK) {
            if State::of(DEFINITION.id, state)? == State::Task {
                *d = TaskExecutionData::default();
            }
            return Ok(Transition::goto(State::Task));
        }

        match State::of(DEFINITION.id, state)? {
            State::Photo => match input {
                Input::Media {
                    kind: MediaKind::Photo,
                    reference,
                } => {
                    d.photos.push(reference);
                    ctx.notice("📷 Photo attached.").await?;
                    Ok(Transition::goto(State::Task))
                }
                _ => Ok(Transition::retry("Please send a photo.")),
            },
            State::Task => {
                if let Some(id) = input.entity(TASK) {
                    return Ok(match own_task(ctx, id).await? {
                        Some(task) => {
                            *d = TaskExecutionData {
                                task_id: Some(task.id),
                                ..Default::default()
                            };
                            Transition::goto(State::Task)
                        }
                        None => Transition::back(State::Task, STALE_NOTICE),
                    });
                }

                let Some(task_id) = d.task_id else {
                    return Ok(Transition::Stay);
                };
                let Some(task) = ctx.repo.get_task(task_id).await? else {
                    ctx.notice(STALE_NOTICE).await?;
                    *d = TaskExecutionData::default();
                    return Ok(Transition::goto(State::Task));
                };

                let Input::Action(action) = &input else {
                    return Ok(Transition::Stay);
                };
                match action.as_str() {
                    START => {
                        if task.status != TaskStatus::Created {
                            return Ok(Transition::retry("The task is already started."));
                        }
                        ctx.repo
                            .update_task_status(task.id, TaskStatus::InProgress)
                            .await?;
                        ctx.notice(&format!("▶️ Task #{} started.", task.id)).await?;
                        Ok(Transition::goto(State::Task))
                    }
                    RUN_CHECKLIST => {
                        if task.checklist_template_id.is_none() {
                            return Ok(Transition::retry("This task has no checklist."));
                        }
                        Ok(Transition::Invoke(
                            WorkflowId::Checklist,
                            Params::task(task.id),
                        ))
                    }
                    PHOTO => Ok(Transition::goto(State::Photo)),
                    COMPLETE => complete(ctx, &task, d).await,
                    _ => Ok(Transition::Stay),
                }
            }
        }
    }
}

/// The task if it exists, is open and is assigned to the actor.
async fn own_task(ctx: &WorkflowContext<'_>, id: EntityId) -> Result<Option<Task>, WorkflowError> {
    let account = ctx.actor.account()?;
    Ok(ctx
        .repo
        .get_task(id)
        .await?
        .filter(|t| t.status.is_open() && t.executor_id == Some(account)))
}

async fn list_prompt(ctx: &WorkflowContext<'_>) -> Result<Prompt, WorkflowError> {
    let tasks = ctx
        .repo
        .list_open_tasks_for(ctx.actor.account()?)
        .await?;
    if tasks.is_empty() {
        return Ok(Prompt::new("🎉 You have no open tasks.").choice(Choice::cancel()));
    }
    let mut choices = Vec::with_capacity(tasks.len());
    for task in &tasks {
        let machine = ctx
            .repo
            .get_machine(task.machine_id)
            .await?
            .map(|m| m.code)
            .unwrap_or_else(|| format!("#{}", task.machine_id));
        choices.push(Choice::new(
            format!("#{} {} · {}", task.id, task.task_type.label(), machine),
            common::entity_token(TASK, task.id),
        ));
    }
    Ok(Prompt::new(format!("📋 Your open tasks ({}):", tasks.len()))
        .grid(choices, 1)
        .choice(Choice::cancel()))
}

async fn task_prompt(
    ctx: &WorkflowContext<'_>,
    task: &Task,
    d: &TaskExecutionData,
) -> Result<Prompt, WorkflowError> {
    let machine = ctx
        .repo
        .get_machine(task.machine_id)
        .await?
        .map(|m| m.label())
        .unwrap_or_else(|| format!("#{}", task.machine_id));

    let mut lines = vec![
        format!("📋 Task #{}: {}", task.id, task.task_type.label()),
        format!("Machine: {machine}"),
        format!("Status: {}", task.status),
    ];
    if let Some(deadline) = task.deadline {
        lines.push(format!("Deadline: {}", deadline.format("%d.%m.%Y")));
    }
    if let Some(kind) = task.task_type.catalog() {
        for line in &task.items {
            let name = ctx
                .repo
                .get_catalog_item(kind, line.item_id)
                .await?
                .map(|i| i.name)
                .unwrap_or_else(|| format!("#{}", line.item_id));
            lines.push(format!("• {name}: {} {}", line.quantity, kind.unit()));
        }
    }
    if let Some(description) = &task.description {
        lines.push(format!("💬 {description}"));
    }
    if let Some(outcome) = &d.checklist {
        lines.push(format!(
            "✅ Checklist: {} passed, {} failed",
            outcome.passed, outcome.failed
        ));
    }
    if !d.photos.is_empty() {
        lines.push(format!("📷 Photos: {}", d.photos.len()));
    }

    let mut actions = Vec::new();
    if task.status == TaskStatus::Created {
        actions.push(Choice::new("▶️ Start", START));
    }
    if task.checklist_template_id.is_some() && d.checklist.is_none() {
        actions.push(Choice::new("✅ Checklist", RUN_CHECKLIST));
    }
    actions.push(Choice::new("📷 Photo", PHOTO));
    if task.status.is_open() {
        actions.push(Choice::new("🏁 Complete", COMPLETE));
    }

    Ok(Prompt::new(lines.join("\n"))
        .grid(actions, 2)
        .row(vec![Choice::new("⬅️ Back", BACK), Choice::cancel()]))
}

async fn complete(
    ctx: &WorkflowContext<'_>,
    task: &Task,
    d: &TaskExecutionData,
) -> Result<Transition, WorkflowError> {
    if !task.status.is_open() {
        return Ok(Transition::retry("The task is already closed."));
    }
    if task.checklist_template_id.is_some() && d.checklist.is_none() {
        return Ok(Transition::retry("Run the checklist before completing the task."));
    }
    ctx.repo
        .update_task_status(task.id, TaskStatus::Completed)
        .await?;
    tracing::info!(task_id = task.id, "Task completed");
    ctx.notice(&format!("🏁 Task #{} completed.", task.id))
        .await?;

    let creator = match ctx.repo.get_user(task.creator_id).await {
        Ok(creator) => creator,
        Err(e) => {
            tracing::warn!(task_id = task.id, error = %e, "Could not look up the task creator");
            None
        }
    };
    if let Some(creator) = creator {
        let mut text = format!(
            "🏁 Task #{} ({}) was completed by {}.",
            task.id,
            task.task_type.label(),
            ctx.actor.name
        );
        if let Some(outcome) = &d.checklist {
            text.push_str(&format!(
                " Checklist: {} passed, {} failed.",
                outcome.passed, outcome.failed
            ));
        }
        if !d.photos.is_empty() {
            text.push_str(&format!(" Photos: {}.", d.photos.len()));
        }
        ctx.notify(&creator, &text).await;
    }
    Ok(Transition::finish())
}
