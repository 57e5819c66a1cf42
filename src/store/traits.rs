//! `Repository` trait: the single async interface to fleet persistence.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::store::model::{
    Bag, CatalogItem, CatalogKind, ChecklistRun, ChecklistTemplate, EntityId, ErrorReport, Machine,
    NewBag, NewChecklistRun, NewErrorReport, NewStockReceipt, NewTask, ReportKind, ReportPeriod,
    ReportSummary, Role, StockReceipt, Task, TaskStatus, User,
};

/// Backend-agnostic repository covering machines, catalogs, users, and the
/// records the workflows create.
///
/// Every call may fail; the workflow engine treats any error as
/// unrecoverable for the running workflow.
#[async_trait]
pub trait Repository: Send + Sync {
    // ── Machines ────────────────────────────────────────────────────

    async fn list_machines(&self) -> Result<Vec<Machine>, DatabaseError>;

    async fn get_machine(&self, id: EntityId) -> Result<Option<Machine>, DatabaseError>;

    // ── Catalogs ────────────────────────────────────────────────────

    async fn list_catalog(&self, kind: CatalogKind) -> Result<Vec<CatalogItem>, DatabaseError>;

    async fn get_catalog_item(
        &self,
        kind: CatalogKind,
        id: EntityId,
    ) -> Result<Option<CatalogItem>, DatabaseError>;

    // ── Checklist templates ─────────────────────────────────────────

    async fn list_checklist_templates(&self) -> Result<Vec<ChecklistTemplate>, DatabaseError>;

    async fn get_checklist_template(
        &self,
        id: EntityId,
    ) -> Result<Option<ChecklistTemplate>, DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    /// List users, optionally only those holding `role`.
    async fn list_users(&self, role: Option<Role>) -> Result<Vec<User>, DatabaseError>;

    async fn get_user(&self, id: EntityId) -> Result<Option<User>, DatabaseError>;

    async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, DatabaseError>;

    /// Create the user if unknown, otherwise add `roles` to the existing set.
    async fn upsert_user(
        &self,
        external_id: &str,
        name: &str,
        roles: &[Role],
    ) -> Result<User, DatabaseError>;

    /// Replace a user's role set.
    async fn update_user_roles(&self, id: EntityId, roles: &[Role]) -> Result<(), DatabaseError>;

    // ── Tasks ───────────────────────────────────────────────────────

    /// Create a task together with its item lines.
    async fn create_task(&self, task: NewTask) -> Result<Task, DatabaseError>;

    async fn get_task(&self, id: EntityId) -> Result<Option<Task>, DatabaseError>;

    /// Open tasks assigned to `executor_id`, oldest first.
    async fn list_open_tasks_for(&self, executor_id: EntityId) -> Result<Vec<Task>, DatabaseError>;

    async fn update_task_status(&self, id: EntityId, status: TaskStatus)
    -> Result<(), DatabaseError>;

    // ── Workflow products ───────────────────────────────────────────

    /// Create a bag together with its lines.
    async fn create_bag(&self, bag: NewBag) -> Result<Bag, DatabaseError>;

    async fn create_checklist_run(&self, run: NewChecklistRun)
    -> Result<ChecklistRun, DatabaseError>;

    async fn create_error_report(&self, report: NewErrorReport)
    -> Result<ErrorReport, DatabaseError>;

    async fn create_stock_receipt(
        &self,
        receipt: NewStockReceipt,
    ) -> Result<StockReceipt, DatabaseError>;

    // ── Reporting ───────────────────────────────────────────────────

    async fn report_summary(
        &self,
        kind: ReportKind,
        period: ReportPeriod,
    ) -> Result<ReportSummary, DatabaseError>;
}
