//! Prompt builders and parsers shared by several scenes.

use std::sync::LazyLock;

use chrono::{Duration, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::channels::{Choice, Prompt};
use crate::error::WorkflowError;
use crate::store::model::{EntityId, Machine, ReportPeriod};
use crate::workflow::context::WorkflowContext;
use crate::workflow::multiselect::{Collect, MultiSelect};
use crate::workflow::state::StateName;
use crate::workflow::transition::Transition;

pub const MACHINE: &str = "machine";
pub const CONFIRM: &str = "confirm";

pub const STALE_NOTICE: &str = "⚠️ That option is no longer available. Please choose again.";

/// Id and display name of a referenced record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Named {
    pub id: EntityId,
    pub name: String,
}

pub fn confirm_row() -> Vec<Choice> {
    vec![Choice::new("✅ Confirm", CONFIRM), Choice::cancel()]
}

pub fn entity_token(prefix: &str, id: EntityId) -> String {
    format!("{prefix}:{id}")
}

/// Machine picker.
pub async fn machine_prompt(
    ctx: &WorkflowContext<'_>,
    title: &str,
) -> Result<Prompt, WorkflowError> {
    let machines = ctx.repo.list_machines().await?;
    let text = if machines.is_empty() {
        format!("{title}\n\nNo machines are registered.")
    } else {
        format!("{title}\n\nChoose a machine:")
    };
    let choices = machines
        .iter()
        .map(|m| Choice::new(m.label(), entity_token(MACHINE, m.id)))
        .collect();
    Ok(Prompt::new(text).grid(choices, 2).choice(Choice::cancel()))
}

pub async fn load_machine(
    ctx: &WorkflowContext<'_>,
    id: EntityId,
) -> Result<Option<Machine>, WorkflowError> {
    Ok(ctx.repo.get_machine(id).await?)
}

/// Select prompt for a multi-select, with the live catalog.
pub async fn select_prompt(
    ctx: &WorkflowContext<'_>,
    ms: &MultiSelect,
    title: &str,
) -> Result<Prompt, WorkflowError> {
    let catalog = ctx.repo.list_catalog(ms.kind).await?;
    Ok(ms.select_prompt(title, &catalog))
}

/// Map a collection outcome onto the scene's own states.
pub fn collect_transition(
    outcome: Collect,
    select: impl Into<StateName>,
    detail: impl Into<StateName>,
    after: impl Into<StateName>,
) -> Transition {
    match outcome {
        Collect::Toggled => Transition::Stay,
        Collect::Stale => Transition::back(select, STALE_NOTICE),
        Collect::Detail | Collect::Next => Transition::goto(detail),
        Collect::Done => Transition::goto(after),
        Collect::Retry(notice) => Transition::Retry(notice),
    }
}

/// Parse a calendar date: `YYYY-MM-DD` or `DD.MM.YYYY`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d.%m.%Y"))
        .ok()
}

/// Parse a deadline relative to `today`: `today`, `tomorrow`, `+N` days or
/// an absolute date. Past dates are refused.
pub fn parse_deadline(raw: &str, today: NaiveDate) -> Result<NaiveDate, String> {
    let lowered = raw.trim().to_lowercase();
    let date = match lowered.as_str() {
        "today" => today,
        "tomorrow" => today + Duration::days(1),
        other if other.starts_with('+') => {
            let days: i64 = other[1..]
                .trim()
                .parse()
                .map_err(|_| format!("Cannot read \"{raw}\" as a number of days."))?;
            Duration::try_days(days)
                .and_then(|span| today.checked_add_signed(span))
                .ok_or_else(|| format!("\"{raw}\" is too far ahead."))?
        }
        other => parse_date(other).ok_or_else(|| {
            format!("Cannot read \"{raw}\" as a date. Use YYYY-MM-DD or DD.MM.YYYY.")
        })?,
    };
    if date < today {
        return Err("The deadline cannot be in the past.".to_string());
    }
    Ok(date)
}

static PERIOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2}|\d{1,2}\.\d{1,2}\.\d{4})\s*-\s*(\d{4}-\d{2}-\d{2}|\d{1,2}\.\d{1,2}\.\d{4})$")
        .unwrap()
});

/// Parse `DD.MM.YYYY-DD.MM.YYYY` (either date format, optional spaces
/// around the dash). The range must not be reversed.
pub fn parse_period(raw: &str) -> Option<ReportPeriod> {
    let caps = PERIOD.captures(raw.trim())?;
    let from = parse_date(&caps[1])?;
    let to = parse_date(&caps[2])?;
    (from <= to).then_some(ReportPeriod { from, to })
}
