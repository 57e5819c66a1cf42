//! The guided dialogues offered by the bot.
//!
//! Each scene owns a data struct; `WorkflowData` tags it with the workflow
//! it belongs to, so no handler can read another workflow's bag.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::workflow::registry::WorkflowRegistry;

pub mod bag_assembly;
pub mod checklist;
pub(crate) mod common;
pub mod create_task;
pub mod error_report;
pub mod manage_users;
pub mod receive_stock;
pub mod report;
pub mod task_execution;

use bag_assembly::BagData;
use checklist::ChecklistData;
use create_task::CreateTaskData;
use error_report::ErrorReportData;
use manage_users::ManageUsersData;
use receive_stock::ReceiveData;
use report::ReportData;
use task_execution::TaskExecutionData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowId {
    CreateTask,
    BagAssembly,
    Checklist,
    TaskExecution,
    ReceiveStock,
    Report,
    ErrorReport,
    ManageUsers,
}

impl WorkflowId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateTask => "create_task",
            Self::BagAssembly => "bag_assembly",
            Self::Checklist => "checklist",
            Self::TaskExecution => "task_execution",
            Self::ReceiveStock => "receive_stock",
            Self::Report => "report",
            Self::ErrorReport => "error_report",
            Self::ManageUsers => "manage_users",
        }
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow-scoped data bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "workflow", content = "data", rename_all = "snake_case")]
pub enum WorkflowData {
    CreateTask(CreateTaskData),
    BagAssembly(BagData),
    Checklist(ChecklistData),
    TaskExecution(TaskExecutionData),
    ReceiveStock(ReceiveData),
    Report(ReportData),
    ErrorReport(ErrorReportData),
    ManageUsers(ManageUsersData),
}

macro_rules! bag_accessors {
    ($($variant:ident => $ty:ty, $get:ident, $get_mut:ident;)+) => {
        impl WorkflowData {
            pub fn workflow(&self) -> WorkflowId {
                match self {
                    $(Self::$variant(_) => WorkflowId::$variant,)+
                }
            }

            $(
                pub fn $get(&self) -> Result<&$ty, WorkflowError> {
                    match self {
                        Self::$variant(data) => Ok(data),
                        _ => Err(WorkflowError::DataMismatch {
                            workflow: WorkflowId::$variant.to_string(),
                        }),
                    }
                }

                pub fn $get_mut(&mut self) -> Result<&mut $ty, WorkflowError> {
                    match self {
                        Self::$variant(data) => Ok(data),
                        _ => Err(WorkflowError::DataMismatch {
                            workflow: WorkflowId::$variant.to_string(),
                        }),
                    }
                }
            )+
        }
    };
}

bag_accessors! {
    CreateTask => CreateTaskData, create_task, create_task_mut;
    BagAssembly => BagData, bag_assembly, bag_assembly_mut;
    Checklist => ChecklistData, checklist, checklist_mut;
    TaskExecution => TaskExecutionData, task_execution, task_execution_mut;
    ReceiveStock => ReceiveData, receive_stock, receive_stock_mut;
    Report => ReportData, report, report_mut;
    ErrorReport => ErrorReportData, error_report, error_report_mut;
    ManageUsers => ManageUsersData, manage_users, manage_users_mut;
}

/// Registry with every built-in scene, in help-listing order.
pub fn registry() -> WorkflowRegistry {
    let mut registry = WorkflowRegistry::new();
    registry.register(Arc::new(create_task::CreateTask));
    registry.register(Arc::new(bag_assembly::BagAssembly));
    registry.register(Arc::new(checklist::Checklist));
    registry.register(Arc::new(task_execution::TaskExecution));
    registry.register(Arc::new(receive_stock::ReceiveStock));
    registry.register(Arc::new(report::Report));
    registry.register(Arc::new(error_report::ErrorReport));
    registry.register(Arc::new(manage_users::ManageUsers));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessor_rejects_foreign_bag() {
        let mut data = WorkflowData::Report(ReportData::default());
        assert!(data.report().is_ok());
        assert_eq!(data.workflow(), WorkflowId::Report);
        let err = data.checklist_mut().unwrap_err();
        assert!(matches!(err, WorkflowError::DataMismatch { workflow } if workflow == "checklist"));
    }

    #[test]
    fn bag_serializes_with_workflow_tag() {
        let data = WorkflowData::Report(ReportData::default());
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["workflow"], "report");
        let back: WorkflowData = serde_json::from_value(json).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn workflow_ids_display_as_serde() {
        let json = serde_json::to_string(&WorkflowId::TaskExecution).unwrap();
        assert_eq!(json, format!("\"{}\"", WorkflowId::TaskExecution));
    }
}
