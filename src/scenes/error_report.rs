//! `/error`: report a machine malfunction to managers and admins.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::channels::{Choice, Prompt};
use crate::error::WorkflowError;
use crate::scenes::common::{self, CONFIRM, MACHINE, STALE_NOTICE};
use crate::scenes::{WorkflowData, WorkflowId};
use crate::store::model::{Machine, NewErrorReport, Role, User};
use crate::workflow::context::WorkflowContext;
use crate::workflow::definition::{
    Accept, CANCEL, Input, SKIP, StateSpec, Workflow, WorkflowDefinition,
};
use crate::workflow::state::{StateName, workflow_states};
use crate::workflow::transition::{Params, Transition};

workflow_states! {
    pub enum State {
        ChooseMachine => "choose_machine",
        Describe => "describe",
        Photo => "photo",
        Confirm => "confirm",
    }
}

static DEFINITION: WorkflowDefinition = WorkflowDefinition {
    id: WorkflowId::ErrorReport,
    command: "error",
    title: "Report a machine error",
    roles: &[Role::Admin, Role::Manager, Role::Operator],
    initial: "choose_machine",
    states: &[
        StateSpec {
            name: "choose_machine",
            accepts: &[Accept::Entity(MACHINE), Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "describe",
            accepts: &[Accept::Text, Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "photo",
            accepts: &[Accept::Media, Accept::Command(SKIP), Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "confirm",
            accepts: &[Accept::Action(CONFIRM), Accept::Command(CANCEL)],
        },
    ],
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorReportData {
    pub machine: Option<Machine>,
    pub description: Option<String>,
    pub photo: Option<String>,
}

pub struct ErrorReport;

#[async_trait]
impl Workflow for ErrorReport {
    fn definition(&self) -> &'static WorkflowDefinition {
        &DEFINITION
    }

    async fn init(
        &self,
        _ctx: &WorkflowContext<'_>,
        _params: Params,
    ) -> Result<WorkflowData, WorkflowError> {
        Ok(WorkflowData::ErrorReport(ErrorReportData::default()))
    }

    async fn render(
        &self,
        ctx: &WorkflowContext<'_>,
        state: &StateName,
        data: &WorkflowData,
    ) -> Result<(), WorkflowError> {
        let d = data.error_report()?;
        let prompt = match State::of(DEFINITION.id, state)? {
            State::ChooseMachine => common::machine_prompt(ctx, "🚨 Error report").await?,
            State::Describe => {
                Prompt::new("✍️ Describe the problem.").choice(Choice::cancel())
            }
            State::Photo => Prompt::new("📷 Attach a photo, or skip.")
                .row(vec![Choice::skip(), Choice::cancel()]),
            State::Confirm => Prompt::new(format!(
                "🚨 Error report\n\nMachine: {}\nProblem: {}\nPhoto: {}",
                d.machine.as_ref().map(|m| m.label()).unwrap_or_default(),
                d.description.as_deref().unwrap_or(""),
                if d.photo.is_some() { "attached" } else { "none" }
            ))
            .row(common::confirm_row()),
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
        let d = data.error_report_mut()?;
        match State::of(DEFINITION.id, state)? {
            State::ChooseMachine => {
                let Some(id) = input.entity(MACHINE) else {
                    return Ok(Transition::Stay);
                };
                Ok(match common::load_machine(ctx, id).await? {
                    Some(machine) => {
                        d.machine = Some(machine);
                        Transition::goto(State::Describe)
                    }
                    None => Transition::back(State::ChooseMachine, STALE_NOTICE),
                })
            }
            State::Describe => match input {
                Input::Text(text) if !text.trim().is_empty() => {
                    d.description = Some(text.trim().to_string());
                    Ok(Transition::goto(State::Photo))
                }
                _ => Ok(Transition::retry("Please describe the problem in a few words.")),
            },
            State::Photo => {
                d.photo = match input {
                    Input::Media { reference, .. } => Some(reference),
                    _ => None,
                };
                Ok(Transition::goto(State::Confirm))
            }
            State::Confirm => submit(ctx, d).await,
        }
    }
}

/// Managers and admins, each once.
async fn responders(ctx: &WorkflowContext<'_>) -> Result<Vec<User>, WorkflowError> {
    let mut by_id = BTreeMap::new();
    for role in [Role::Manager, Role::Admin] {
        for user in ctx.repo.list_users(Some(role)).await? {
            by_id.insert(user.id, user);
        }
    }
    Ok(by_id.into_values().collect())
}

async fn submit(
    ctx: &WorkflowContext<'_>,
    d: &ErrorReportData,
) -> Result<Transition, WorkflowError> {
    let (Some(machine), Some(description)) = (&d.machine, &d.description) else {
        return Ok(Transition::back(State::ChooseMachine, STALE_NOTICE));
    };
    let report = ctx
        .repo
        .create_error_report(NewErrorReport {
            machine_id: machine.id,
            reported_by: ctx.actor.account()?,
            description: description.clone(),
            photo: d.photo.clone(),
        })
        .await?;
    tracing::info!(report_id = report.id, machine = %machine.code, "Error report filed");
    ctx.notice(&format!("✅ Error report #{} sent.", report.id))
        .await?;

    let text = format!(
        "🚨 Error on {} reported by {}: {}",
        machine.label(),
        ctx.actor.name,
        description
    );
    // The report is saved; a failed recipient lookup only skips the alerts.
    let recipients = match responders(ctx).await {
        Ok(users) => users,
        Err(e) => {
            tracing::warn!(report_id = report.id, error = %e, "Could not resolve error report recipients");
            Vec::new()
        }
    };
    for user in recipients {
        if Some(user.id) != ctx.actor.account_id {
            ctx.notify(&user, &text).await;
        }
    }
    Ok(Transition::finish())
}
