//! `/newtask`: a manager assigns work on a machine.
//!
//! choose_type → choose_machine → [select_ingredients | select_water →
//! item_quantities] → deadline → choose_checklist → choose_executor →
//! description → confirm. Item collection only runs for task types that
//! carry a catalog, and each select state accepts only its own catalog.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::channels::{Choice, Prompt};
use crate::error::WorkflowError;
use crate::scenes::common::{self, CONFIRM, MACHINE, Named, STALE_NOTICE};
use crate::scenes::{WorkflowData, WorkflowId};
use crate::store::model::{CatalogKind, Machine, NewTask, Role, TaskType, User};
use crate::workflow::context::WorkflowContext;
use crate::workflow::definition::{
    Accept, CANCEL, Input, SKIP, StateSpec, Workflow, WorkflowDefinition,
};
use crate::workflow::multiselect::{DONE, MultiSelect};
use crate::workflow::state::{StateName, workflow_states};
use crate::workflow::transition::{Params, Transition};

const TEMPLATE: &str = "tpl";
const USER: &str = "user";
const RESTART: &str = "restart";

workflow_states! {
    pub enum State {
        ChooseType => "choose_type",
        ChooseMachine => "choose_machine",
        SelectIngredients => "select_ingredients",
        SelectWater => "select_water",
        ItemQuantities => "item_quantities",
        Deadline => "deadline",
        ChooseChecklist => "choose_checklist",
        ChooseExecutor => "choose_executor",
        Description => "description",
        Confirm => "confirm",
    }
}

static DEFINITION: WorkflowDefinition = WorkflowDefinition {
    id: WorkflowId::CreateTask,
    command: "newtask",
    title: "Create a task",
    roles: &[Role::Admin, Role::Manager],
    initial: "choose_type",
    states: &[
        StateSpec {
            name: "choose_type",
            accepts: &[
                Accept::Action("type:INGREDIENTS"),
                Accept::Action("type:WATER"),
                Accept::Action("type:CLEANING"),
                Accept::Action("type:REPAIR"),
                Accept::Action("type:INSPECTION"),
                Accept::Command(CANCEL),
            ],
        },
        StateSpec {
            name: "choose_machine",
            accepts: &[Accept::Entity(MACHINE), Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "select_ingredients",
            accepts: &[Accept::Action(DONE), Accept::Entity("ing"), Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "select_water",
            accepts: &[Accept::Action(DONE), Accept::Entity("wat"), Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "item_quantities",
            accepts: &[Accept::Text, Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "deadline",
            accepts: &[Accept::Text, Accept::Command(SKIP), Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "choose_checklist",
            accepts: &[
                Accept::Entity(TEMPLATE),
                Accept::Command(SKIP),
                Accept::Command(CANCEL),
            ],
        },
        StateSpec {
            name: "choose_executor",
            accepts: &[
                Accept::Entity(USER),
                Accept::Command(SKIP),
                Accept::Command(CANCEL),
            ],
        },
        StateSpec {
            name: "description",
            accepts: &[Accept::Text, Accept::Command(SKIP), Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "confirm",
            accepts: &[
                Accept::Action(CONFIRM),
                Accept::Action(RESTART),
                Accept::Command(CANCEL),
            ],
        },
    ],
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateTaskData {
    pub task_type: Option<TaskType>,
    pub machine: Option<Machine>,
    /// Present only for task types that carry catalog items.
    pub items: Option<MultiSelect>,
    pub deadline: Option<chrono::NaiveDate>,
    pub template: Option<Named>,
    pub executor: Option<User>,
    pub description: Option<String>,
}

impl CreateTaskData {
    fn items_mut(&mut self) -> Result<&mut MultiSelect, WorkflowError> {
        self.items.as_mut().ok_or_else(|| WorkflowError::DataMismatch {
            workflow: WorkflowId::CreateTask.to_string(),
        })
    }

    /// Select state matching the catalog of the chosen task type.
    fn select_state(&self) -> Option<State> {
        self.items.as_ref().map(|ms| match ms.kind {
            CatalogKind::Water => State::SelectWater,
            _ => State::SelectIngredients,
        })
    }

    fn summary(&self) -> String {
        let mut lines = vec!["📝 New task".to_string()];
        if let Some(t) = self.task_type {
            lines.push(format!("Type: {}", t.label()));
        }
        if let Some(m) = &self.machine {
            lines.push(format!("Machine: {}", m.label()));
        }
        if let Some(items) = &self.items {
            lines.push(format!("Items:\n{}", items.summary()));
        }
        lines.push(format!(
            "Deadline: {}",
            self.deadline
                .map(|d| d.format("%d.%m.%Y").to_string())
                .unwrap_or_else(|| "none".into())
        ));
        lines.push(format!(
            "Checklist: {}",
            self.template.as_ref().map_or("none", |t| t.name.as_str())
        ));
        lines.push(format!(
            "Executor: {}",
            self.executor.as_ref().map_or("unassigned", |u| u.name.as_str())
        ));
        if let Some(d) = &self.description {
            lines.push(format!("Description: {d}"));
        }
        lines.join("\n")
    }
}

pub struct CreateTask;

#[async_trait]
impl Workflow for CreateTask {
    fn definition(&self) -> &'static WorkflowDefinition {
        &DEFINITION
    }

    async fn init(
        &self,
        _ctx: &WorkflowContext<'_>,
        _params: Params,
    ) -> Result<WorkflowData, WorkflowError> {
        Ok(WorkflowData::CreateTask(CreateTaskData::default()))
    }

    async fn render(
        &self,
        ctx: &WorkflowContext<'_>,
        state: &StateName,
        data: &WorkflowData,
    ) -> Result<(), WorkflowError> {
        let d = data.create_task()?;
        let prompt = match State::of(DEFINITION.id, state)? {
            State::ChooseType => {
                let types = TaskType::ALL
                    .iter()
                    .map(|t| Choice::new(t.label(), format!("type:{}", t.as_str())))
                    .collect();
                Prompt::new("🆕 New task\n\nChoose the task type:")
                    .grid(types, 1)
                    .choice(Choice::cancel())
            }
            State::ChooseMachine => common::machine_prompt(ctx, "🏭 Machine for the task").await?,
            State::SelectIngredients | State::SelectWater => {
                let items = d.items.as_ref().ok_or_else(|| WorkflowError::DataMismatch {
                    workflow: DEFINITION.id.to_string(),
                })?;
                common::select_prompt(ctx, items, "📦 Select the items to deliver").await?
            }
            State::ItemQuantities => match &d.items {
                Some(items) => items.detail_prompt(false),
                None => Prompt::new("No items selected."),
            },
            State::Deadline => Prompt::new(
                "📅 Deadline?\n\nSend today, tomorrow, +N (days), YYYY-MM-DD or DD.MM.YYYY.",
            )
            .row(vec![Choice::skip(), Choice::cancel()]),
            State::ChooseChecklist => {
                let templates = ctx.repo.list_checklist_templates().await?;
                let choices = templates
                    .iter()
                    .map(|t| Choice::new(&t.name, common::entity_token(TEMPLATE, t.id)))
                    .collect();
                Prompt::new("✅ Attach a checklist?")
                    .grid(choices, 1)
                    .row(vec![Choice::skip(), Choice::cancel()])
            }
            State::ChooseExecutor => {
                let operators = ctx.repo.list_users(Some(Role::Operator)).await?;
                let choices = operators
                    .iter()
                    .map(|u| Choice::new(&u.name, common::entity_token(USER, u.id)))
                    .collect();
                Prompt::new("👷 Who should do it?")
                    .grid(choices, 2)
                    .row(vec![Choice::skip(), Choice::cancel()])
            }
            State::Description => Prompt::new("💬 Add a description, or skip.")
                .row(vec![Choice::skip(), Choice::cancel()]),
            State::Confirm => Prompt::new(d.summary()).row(vec![
                Choice::new("✅ Create", CONFIRM),
                Choice::new("🔄 Start over", RESTART),
                Choice::cancel(),
            ]),
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
        let d = data.create_task_mut()?;
        let transition = match State::of(DEFINITION.id, state)? {
            State::ChooseType => {
                let Input::Action(token) = &input else {
                    return Ok(Transition::Stay);
                };
                let raw = token.trim_start_matches("type:");
                let task_type: TaskType = raw.parse().map_err(|_| WorkflowError::UnknownState {
                    workflow: DEFINITION.id.to_string(),
                    state: token.clone(),
                })?;
                d.task_type = Some(task_type);
                d.items = task_type.catalog().map(MultiSelect::new);
                Transition::goto(State::ChooseMachine)
            }
            State::ChooseMachine => {
                let Some(id) = input.entity(MACHINE) else {
                    return Ok(Transition::Stay);
                };
                match common::load_machine(ctx, id).await? {
                    Some(machine) => {
                        d.machine = Some(machine);
                        match d.select_state() {
                            Some(select) => Transition::goto(select),
                            None => Transition::goto(State::Deadline),
                        }
                    }
                    None => Transition::back(State::ChooseMachine, STALE_NOTICE),
                }
            }
            current @ (State::SelectIngredients | State::SelectWater) => {
                match d.items_mut()?.on_select(ctx, &input).await? {
                    Some(outcome) => common::collect_transition(
                        outcome,
                        current,
                        State::ItemQuantities,
                        State::Deadline,
                    ),
                    None => Transition::Stay,
                }
            }
            State::ItemQuantities => {
                let select = d.select_state().ok_or_else(|| WorkflowError::DataMismatch {
                    workflow: DEFINITION.id.to_string(),
                })?;
                match d.items_mut()?.on_detail(&input, None) {
                    Some(outcome) => common::collect_transition(
                        outcome,
                        select,
                        State::ItemQuantities,
                        State::Deadline,
                    ),
                    None => Transition::Stay,
                }
            }
            State::Deadline => match &input {
                Input::Text(raw) => match common::parse_deadline(raw, Utc::now().date_naive()) {
                    Ok(date) => {
                        d.deadline = Some(date);
                        Transition::goto(State::ChooseChecklist)
                    }
                    Err(notice) => Transition::Retry(notice),
                },
                _ => {
                    d.deadline = None;
                    Transition::goto(State::ChooseChecklist)
                }
            },
            State::ChooseChecklist => match input.entity(TEMPLATE) {
                Some(id) => match ctx.repo.get_checklist_template(id).await? {
                    Some(t) => {
                        d.template = Some(Named {
                            id: t.id,
                            name: t.name,
                        });
                        Transition::goto(State::ChooseExecutor)
                    }
                    None => Transition::back(State::ChooseChecklist, STALE_NOTICE),
                },
                None => {
                    d.template = None;
                    Transition::goto(State::ChooseExecutor)
                }
            },
            State::ChooseExecutor => match input.entity(USER) {
                Some(id) => match ctx.repo.get_user(id).await? {
                    Some(user) => {
                        d.executor = Some(user);
                        Transition::goto(State::Description)
                    }
                    None => Transition::back(State::ChooseExecutor, STALE_NOTICE),
                },
                None => {
                    d.executor = None;
                    Transition::goto(State::Description)
                }
            },
            State::Description => match &input {
                Input::Text(text) if text.trim().is_empty() => {
                    Transition::retry("The description is empty. Send some text or skip.")
                }
                Input::Text(text) => {
                    d.description = Some(text.trim().to_string());
                    Transition::goto(State::Confirm)
                }
                _ => {
                    d.description = None;
                    Transition::goto(State::Confirm)
                }
            },
            State::Confirm => {
                if input.is_action(RESTART) {
                    *d = CreateTaskData::default();
                    return Ok(Transition::goto(State::ChooseType));
                }
                create(ctx, d).await?
            }
        };
        Ok(transition)
    }
}

/// Persist the task in one repository call, then tell the executor.
async fn create(
    ctx: &WorkflowContext<'_>,
    d: &CreateTaskData,
) -> Result<Transition, WorkflowError> {
    let (Some(task_type), Some(machine)) = (d.task_type, d.machine.as_ref()) else {
        return Ok(Transition::back(
            State::ChooseType,
            "The task is incomplete. Please start again.",
        ));
    };

    let task = ctx
        .repo
        .create_task(NewTask {
            task_type,
            machine_id: machine.id,
            items: d.items.as_ref().map(|ms| ms.lines()).unwrap_or_default(),
            deadline: d.deadline,
            checklist_template_id: d.template.as_ref().map(|t| t.id),
            executor_id: d.executor.as_ref().map(|u| u.id),
            creator_id: ctx.actor.account()?,
            description: d.description.clone(),
        })
        .await?;

    tracing::info!(task_id = task.id, task_type = %task_type, "Task created");
    ctx.notice(&format!("✅ Task #{} created.", task.id)).await?;

    if let Some(executor) = &d.executor {
        ctx.notify(
            executor,
            &format!(
                "📋 New task #{}: {} at {}. Open /mytasks to start.",
                task.id,
                task_type.label(),
                machine.label()
            ),
        )
        .await;
    }
    Ok(Transition::finish())
}
