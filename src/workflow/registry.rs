//! Registry of available workflows. Built once at startup, read-only after.

use std::collections::HashMap;
use std::sync::Arc;

use crate::scenes::WorkflowId;
use crate::store::model::Role;
use crate::workflow::definition::{Workflow, WorkflowDefinition};
use crate::workflow::role;

#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<WorkflowId, Arc<dyn Workflow>>,
    /// Registration order, used for help listings.
    order: Vec<WorkflowId>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow. A later registration for the same id replaces
    /// the earlier one.
    pub fn register(&mut self, workflow: Arc<dyn Workflow>) {
        let id = workflow.definition().id;
        if self.workflows.insert(id, workflow).is_none() {
            self.order.push(id);
        } else {
            tracing::warn!(workflow = %id, "Replaced previously registered workflow");
        }
        tracing::debug!("Registered workflow: {}", id);
    }

    pub fn get(&self, id: WorkflowId) -> Option<Arc<dyn Workflow>> {
        self.workflows.get(&id).cloned()
    }

    /// Workflow whose entry command is `command` (normalized, no slash).
    pub fn by_command(&self, command: &str) -> Option<Arc<dyn Workflow>> {
        self.workflows
            .values()
            .find(|w| w.definition().command == command)
            .cloned()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &'static WorkflowDefinition> + '_ {
        self.order
            .iter()
            .filter_map(|id| self.workflows.get(id))
            .map(|w| w.definition())
    }

    /// Definitions whose role guard admits `roles`.
    pub fn available_to(&self, roles: &[Role]) -> Vec<&'static WorkflowDefinition> {
        self.definitions()
            .filter(|d| role::check(roles, d.roles).is_allowed())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.workflows.len()
    }
}
