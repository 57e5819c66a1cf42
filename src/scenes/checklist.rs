//! `/checklist`: walk a checklist template item by item.
//!
//! Entered directly it starts by choosing a template; invoked from a task it
//! uses the task's template and hands the pass/fail counts back on submit.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::channels::{Choice, Prompt};
use crate::error::WorkflowError;
use crate::scenes::common::{self, STALE_NOTICE};
use crate::scenes::{WorkflowData, WorkflowId};
use crate::store::model::{
    ChecklistItem, ChecklistResult, ChecklistTemplate, EntityId, NewChecklistRun, Role, Verdict,
};
use crate::workflow::context::WorkflowContext;
use crate::workflow::definition::{Accept, CANCEL, Input, StateSpec, Workflow, WorkflowDefinition};
use crate::workflow::event::MediaKind;
use crate::workflow::state::{StateName, workflow_states};
use crate::workflow::transition::{ChecklistOutcome, Params, Transition};

const TEMPLATE: &str = "tpl";
const OK: &str = "ok";
const FAIL: &str = "fail";
const SUBMIT: &str = "submit";
const REDO: &str = "redo";

workflow_states! {
    pub enum State {
        ChooseTemplate => "choose_template",
        Item => "item",
        Confirm => "confirm",
    }
}

static DEFINITION: WorkflowDefinition = WorkflowDefinition {
    id: WorkflowId::Checklist,
    command: "checklist",
    title: "Run a checklist",
    roles: &[Role::Admin, Role::Manager, Role::Operator],
    initial: "choose_template",
    states: &[
        StateSpec {
            name: "choose_template",
            accepts: &[Accept::Entity(TEMPLATE), Accept::Command(CANCEL)],
        },
        StateSpec {
            name: "item",
            accepts: &[
                Accept::Action(OK),
                Accept::Action(FAIL),
                Accept::Text,
                Accept::Media,
                Accept::Command(CANCEL),
            ],
        },
        StateSpec {
            name: "confirm",
            accepts: &[
                Accept::Action(SUBMIT),
                Accept::Action(REDO),
                Accept::Command(CANCEL),
            ],
        },
    ],
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChecklistData {
    /// Task the run belongs to, when invoked from task execution.
    pub task_id: Option<EntityId>,
    pub template: Option<ChecklistTemplate>,
    /// Index of the item awaiting a verdict.
    pub cursor: usize,
    pub results: Vec<ChecklistResult>,
    /// Photo attached to the current item.
    pub photo: Option<String>,
    /// Comment attached to the current item.
    pub comment: Option<String>,
}

impl ChecklistData {
    fn current(&self) -> Option<&ChecklistItem> {
        self.template.as_ref()?.items.get(self.cursor)
    }

    fn counts(&self) -> (usize, usize) {
        let passed = self
            .results
            .iter()
            .filter(|r| r.verdict == Verdict::Passed)
            .count();
        (passed, self.results.len() - passed)
    }

    fn restart(&mut self) {
        self.cursor = 0;
        self.results.clear();
        self.photo = None;
        self.comment = None;
    }

    /// State to show once the template is known.
    fn walk_state(&self) -> State {
        if self.current().is_some() {
            State::Item
        } else {
            State::Confirm
        }
    }
}

pub struct Checklist;

#[async_trait]
impl Workflow for Checklist {
    fn definition(&self) -> &'static WorkflowDefinition {
        &DEFINITION
    }

    async fn init(
        &self,
        ctx: &WorkflowContext<'_>,
        params: Params,
    ) -> Result<WorkflowData, WorkflowError> {
        let mut data = ChecklistData {
            task_id: params.task_id,
            ..Default::default()
        };
        if let Some(task_id) = params.task_id
            && let Some(task) = ctx.repo.get_task(task_id).await?
            && let Some(template_id) = task.checklist_template_id
        {
            data.template = ctx.repo.get_checklist_template(template_id).await?;
        }
        Ok(WorkflowData::Checklist(data))
    }

    fn initial_state(&self, data: &WorkflowData) -> StateName {
        match data.checklist() {
            Ok(d) if d.template.is_some() => d.walk_state().into(),
            _ => State::ChooseTemplate.into(),
        }
    }

    async fn render(
        &self,
        ctx: &WorkflowContext<'_>,
        state: &StateName,
        data: &WorkflowData,
    ) -> Result<(), WorkflowError> {
        let d = data.checklist()?;
        let prompt = match State::of(DEFINITION.id, state)? {
            State::ChooseTemplate => {
                let templates = ctx.repo.list_checklist_templates().await?;
                let choices = templates
                    .iter()
                    .map(|t| Choice::new(&t.name, common::entity_token(TEMPLATE, t.id)))
                    .collect();
                Prompt::new("✅ Choose a checklist:")
                    .grid(choices, 1)
                    .choice(Choice::cancel())
            }
            State::Item => item_prompt(d),
            State::Confirm => {
                let (passed, failed) = d.counts();
                let name = d.template.as_ref().map_or("", |t| t.name.as_str());
                Prompt::new(format!(
                    "✅ {name} finished\n\nPassed: {passed}\nFailed: {failed}\n\nSubmit the results?"
                ))
                .row(vec![
                    Choice::new("📨 Submit", SUBMIT),
                    Choice::new("🔄 Redo", REDO),
                ])
                .choice(Choice::cancel())
            }
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
        let d = data.checklist_mut()?;
        match State::of(DEFINITION.id, state)? {
            State::ChooseTemplate => {
                let Some(id) = input.entity(TEMPLATE) else {
                    return Ok(Transition::Stay);
                };
                match ctx.repo.get_checklist_template(id).await? {
                    Some(template) => {
                        d.template = Some(template);
                        d.restart();
                        Ok(Transition::goto(d.walk_state()))
                    }
                    None => Ok(Transition::back(State::ChooseTemplate, STALE_NOTICE)),
                }
            }
            State::Item => handle_item(d, input),
            State::Confirm => {
                if input.is_action(REDO) {
                    d.restart();
                    return Ok(Transition::goto(d.walk_state()));
                }
                submit(ctx, d).await
            }
        }
    }

    fn cancel_params(&self, data: &WorkflowData) -> Params {
        Params {
            task_id: data.checklist().ok().and_then(|d| d.task_id),
            checklist: None,
        }
    }
}

fn item_prompt(d: &ChecklistData) -> Prompt {
    let (Some(template), Some(item)) = (d.template.as_ref(), d.current()) else {
        return Prompt::new("All items checked.").choice(Choice::cancel());
    };
    let mut text = format!(
        "✅ {}\n\nItem {} of {}: {}",
        template.name,
        d.cursor + 1,
        template.items.len(),
        item.title
    );
    if item.requires_photo {
        text.push_str(match d.photo {
            Some(_) => "\n📷 Photo attached.",
            None => "\n📷 A photo is required before the verdict.",
        });
    }
    if let Some(comment) = &d.comment {
        text.push_str(&format!("\n💬 {comment}"));
    }
    text.push_str("\n\nSend a comment or a photo, then choose a verdict.");
    Prompt::new(text)
        .row(vec![
            Choice::new("👍 OK", OK),
            Choice::new("👎 Problem", FAIL),
        ])
        .choice(Choice::cancel())
}

fn handle_item(d: &mut ChecklistData, input: Input) -> Result<Transition, WorkflowError> {
    let Some(item) = d.current().cloned() else {
        return Ok(Transition::goto(State::Confirm));
    };
    match input {
        Input::Media {
            kind: MediaKind::Photo,
            reference,
        } => {
            d.photo = Some(reference);
            Ok(Transition::goto(State::Item))
        }
        Input::Media { .. } => Ok(Transition::retry("Please send a photo, not a file.")),
        Input::Text(text) if text.trim().is_empty() => Ok(Transition::Stay),
        Input::Text(text) => {
            d.comment = Some(text.trim().to_string());
            Ok(Transition::goto(State::Item))
        }
        Input::Action(token) => {
            let verdict = match token.as_str() {
                OK => Verdict::Passed,
                FAIL => Verdict::Failed,
                _ => return Ok(Transition::Stay),
            };
            if item.requires_photo && d.photo.is_none() {
                return Ok(Transition::retry("📷 This item needs a photo first."));
            }
            d.results.push(ChecklistResult {
                item_id: item.id,
                verdict,
                photo: d.photo.take(),
                comment: d.comment.take(),
            });
            d.cursor += 1;
            Ok(Transition::goto(d.walk_state()))
        }
        Input::Entity { .. } | Input::Command(_) => Ok(Transition::Stay),
    }
}

async fn submit(ctx: &WorkflowContext<'_>, d: &ChecklistData) -> Result<Transition, WorkflowError> {
    let Some(template) = &d.template else {
        return Ok(Transition::back(State::ChooseTemplate, STALE_NOTICE));
    };
    let run = ctx
        .repo
        .create_checklist_run(NewChecklistRun {
            template_id: template.id,
            task_id: d.task_id,
            performed_by: ctx.actor.account()?,
            results: d.results.clone(),
        })
        .await?;
    let (passed, failed) = d.counts();
    tracing::info!(run_id = run.id, passed, failed, "Checklist submitted");
    ctx.notice(&format!(
        "✅ Checklist saved: {passed} passed, {failed} failed."
    ))
    .await?;
    Ok(Transition::Finish(Params {
        task_id: d.task_id,
        checklist: Some(ChecklistOutcome {
            run_id: run.id,
            template_id: template.id,
            passed,
            failed,
        }),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(requires_photo: bool) -> ChecklistData {
        ChecklistData {
            template: Some(ChecklistTemplate {
                id: 1,
                name: "Daily".into(),
                items: vec![
                    ChecklistItem {
                        id: 10,
                        position: 0,
                        title: "Clean nozzle".into(),
                        requires_photo,
                    },
                    ChecklistItem {
                        id: 11,
                        position: 1,
                        title: "Check cups".into(),
                        requires_photo: false,
                    },
                ],
            }),
            ..Default::default()
        }
    }

    #[test]
    fn verdicts_advance_to_confirm() {
        let mut d = data(false);
        assert_eq!(
            handle_item(&mut d, Input::Action(OK.into())).unwrap(),
            Transition::goto(State::Item)
        );
        handle_item(&mut d, Input::Text("cups low".into())).unwrap();
        assert_eq!(
            handle_item(&mut d, Input::Action(FAIL.into())).unwrap(),
            Transition::goto(State::Confirm)
        );
        assert_eq!(d.counts(), (1, 1));
        assert_eq!(d.results[1].comment.as_deref(), Some("cups low"));
    }

    #[test]
    fn photo_required_before_verdict() {
        let mut d = data(true);
        let t = handle_item(&mut d, Input::Action(OK.into())).unwrap();
        assert!(matches!(t, Transition::Retry(_)));
        assert!(d.results.is_empty());

        handle_item(
            &mut d,
            Input::Media {
                kind: MediaKind::Photo,
                reference: "file-1".into(),
            },
        )
        .unwrap();
        handle_item(&mut d, Input::Action(OK.into())).unwrap();
        assert_eq!(d.results[0].photo.as_deref(), Some("file-1"));
        assert!(d.photo.is_none());
    }

    #[test]
    fn documents_do_not_count_as_photos() {
        let mut d = data(true);
        let t = handle_item(
            &mut d,
            Input::Media {
                kind: MediaKind::Document,
                reference: "doc".into(),
            },
        )
        .unwrap();
        assert!(matches!(t, Transition::Retry(_)));
    }

    #[test]
    fn restart_clears_progress() {
        let mut d = data(false);
        handle_item(&mut d, Input::Action(OK.into())).unwrap();
        d.restart();
        assert_eq!(d.cursor, 0);
        assert!(d.results.is_empty());
    }
}
