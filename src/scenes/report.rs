//! `/report`: summary counts over a period.

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::channels::{Choice, Prompt};
use crate::error::WorkflowError;
use crate::scenes::common;
use crate::scenes::{WorkflowData, WorkflowId};
use crate::store::model::{ReportKind, ReportPeriod, ReportSummary, Role};
use crate::workflow::context::WorkflowContext;
use crate::workflow::definition::{Accept, CANCEL, Input, StateSpec, Workflow, WorkflowDefinition};
use crate::workflow::state::{StateName, workflow_states};
use crate::workflow::transition::{Params, Transition};

workflow_states! {
    pub enum State {
        ChooseKind => "choose_kind",
        ChoosePeriod => "choose_period",
    }
}

static DEFINITION: WorkflowDefinition = WorkflowDefinition {
    id: WorkflowId::Report,
    command: "report",
    title: "Reports",
    roles: &[Role::Admin, Role::Manager],
    initial: "choose_kind",
    states: &[
        StateSpec {
            name: "choose_kind",
            accepts: &[
                Accept::Action("tasks"),
                Accept::Action("bags"),
                Accept::Action("errors"),
                Accept::Command(CANCEL),
            ],
        },
        StateSpec {
            name: "choose_period",
            accepts: &[
                Accept::Action("today"),
                Accept::Action("week"),
                Accept::Action("month"),
                Accept::Text,
                Accept::Command(CANCEL),
            ],
        },
    ],
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportData {
    pub kind: Option<ReportKind>,
}

/// Period for a preset token, ending today.
pub fn preset_period(token: &str, today: NaiveDate) -> Option<ReportPeriod> {
    let from = match token {
        "today" => today,
        "week" => today - Duration::days(6),
        "month" => today.with_day(1)?,
        _ => return None,
    };
    Some(ReportPeriod { from, to: today })
}

pub fn format_summary(summary: &ReportSummary) -> String {
    let title = match summary.kind {
        ReportKind::Tasks => "📊 Tasks",
        ReportKind::Bags => "📊 Bags",
        ReportKind::Errors => "📊 Error reports",
    };
    let mut text = format!(
        "{title}\n{} – {}\n\nTotal: {}",
        summary.period.from.format("%d.%m.%Y"),
        summary.period.to.format("%d.%m.%Y"),
        summary.total
    );
    for (label, count) in &summary.breakdown {
        text.push_str(&format!("\n• {label}: {count}"));
    }
    text
}

pub struct Report;

#[async_trait]
impl Workflow for Report {
    fn definition(&self) -> &'static WorkflowDefinition {
        &DEFINITION
    }

    async fn init(
        &self,
        _ctx: &WorkflowContext<'_>,
        _params: Params,
    ) -> Result<WorkflowData, WorkflowError> {
        Ok(WorkflowData::Report(ReportData::default()))
    }

    async fn render(
        &self,
        ctx: &WorkflowContext<'_>,
        state: &StateName,
        data: &WorkflowData,
    ) -> Result<(), WorkflowError> {
        data.report()?;
        let prompt = match State::of(DEFINITION.id, state)? {
            State::ChooseKind => Prompt::new("📊 Which report?")
                .row(vec![
                    Choice::new("Tasks", ReportKind::Tasks.as_str()),
                    Choice::new("Bags", ReportKind::Bags.as_str()),
                    Choice::new("Errors", ReportKind::Errors.as_str()),
                ])
                .choice(Choice::cancel()),
            State::ChoosePeriod => Prompt::new(
                "📅 Choose a period, or send a range like 01.03.2026-31.03.2026.",
            )
            .row(vec![
                Choice::new("Today", "today"),
                Choice::new("7 days", "week"),
                Choice::new("This month", "month"),
            ])
            .choice(Choice::cancel()),
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
        let d = data.report_mut()?;
        match State::of(DEFINITION.id, state)? {
            State::ChooseKind => {
                d.kind = match &input {
                    Input::Action(t) if t == "tasks" => Some(ReportKind::Tasks),
                    Input::Action(t) if t == "bags" => Some(ReportKind::Bags),
                    Input::Action(t) if t == "errors" => Some(ReportKind::Errors),
                    _ => return Ok(Transition::Stay),
                };
                Ok(Transition::goto(State::ChoosePeriod))
            }
            State::ChoosePeriod => {
                let Some(kind) = d.kind else {
                    return Ok(Transition::back(State::ChooseKind, "Choose a report first."));
                };
                let today = Utc::now().date_naive();
                let period = match &input {
                    Input::Action(token) => preset_period(token, today),
                    Input::Text(raw) => common::parse_period(raw),
                    _ => None,
                };
                let Some(period) = period else {
                    return Ok(Transition::retry(
                        "Cannot read that period. Use DD.MM.YYYY-DD.MM.YYYY.",
                    ));
                };
                let summary = ctx.repo.report_summary(kind, period).await?;
                ctx.notice(&format_summary(&summary)).await?;
                Ok(Transition::finish())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_end_today() {
        let today = NaiveDate::from_ymd_opt(2026, 5, 20).unwrap();
        let week = preset_period("week", today).unwrap();
        assert_eq!(week.from, NaiveDate::from_ymd_opt(2026, 5, 14).unwrap());
        assert_eq!(week.to, today);
        let month = preset_period("month", today).unwrap();
        assert_eq!(month.from, NaiveDate::from_ymd_opt(2026, 5, 1).unwrap());
        assert!(preset_period("year", today).is_none());
    }

    #[test]
    fn summary_lists_breakdown() {
        let day = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        let text = format_summary(&ReportSummary {
            kind: ReportKind::Tasks,
            period: ReportPeriod { from: day, to: day },
            total: 3,
            breakdown: vec![("completed".into(), 2), ("created".into(), 1)],
        });
        assert!(text.contains("Total: 3"));
        assert!(text.contains("• completed: 2"));
    }
}
