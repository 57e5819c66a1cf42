//! Handler results and the parameters carried between workflows.

use serde::{Deserialize, Serialize};

use crate::scenes::WorkflowId;
use crate::store::model::EntityId;
use crate::workflow::state::StateName;

/// Summary of a submitted checklist run, handed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistOutcome {
    pub run_id: EntityId,
    pub template_id: EntityId,
    pub passed: usize,
    pub failed: usize,
}

/// Parameters passed on workflow entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklist: Option<ChecklistOutcome>,
}

impl Params {
    pub fn task(task_id: EntityId) -> Self {
        Self {
            task_id: Some(task_id),
            checklist: None,
        }
    }
}

/// What a handler asks the router to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Keep the state; re-render the current prompt in place.
    Stay,
    /// Validation failed: send the notice and re-prompt. The bag is unchanged.
    Retry(String),
    /// Move to another state of the same workflow and render it.
    Goto(StateName),
    /// A referenced entity vanished: notice, then re-render an earlier
    /// selection prompt. The bag is unchanged.
    Back { state: StateName, notice: String },
    /// Leave the workflow, handing `Params` to the return workflow if any.
    Finish(Params),
    /// Leave the whole call chain and enter another workflow.
    Switch(WorkflowId, Params),
    /// Enter another workflow as a sub-step, returning here afterwards.
    Invoke(WorkflowId, Params),
}

impl Transition {
    pub fn goto(state: impl Into<StateName>) -> Self {
        Self::Goto(state.into())
    }

    pub fn retry(notice: impl Into<String>) -> Self {
        Self::Retry(notice.into())
    }

    pub fn back(state: impl Into<StateName>, notice: impl Into<String>) -> Self {
        Self::Back {
            state: state.into(),
            notice: notice.into(),
        }
    }

    pub fn finish() -> Self {
        Self::Finish(Params::default())
    }

    /// Whether the handler's bag edits should be kept.
    pub fn commits(&self) -> bool {
        !matches!(self, Self::Retry(_) | Self::Back { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_transitions_discard_edits() {
        assert!(!Transition::retry("bad number").commits());
        assert!(!Transition::back("select", "gone").commits());
        assert!(Transition::Stay.commits());
        assert!(Transition::goto("confirm").commits());
        assert!(Transition::finish().commits());
    }

    #[test]
    fn empty_params_serialize_compactly() {
        let json = serde_json::to_string(&Params::default()).unwrap();
        assert_eq!(json, "{}");
        let json = serde_json::to_value(Params::task(9)).unwrap();
        assert_eq!(json["task_id"], 9);
    }
}
