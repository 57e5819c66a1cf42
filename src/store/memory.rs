//! In-memory repository: volatile backend for local runs and tests.
//!
//! Seed helpers populate reference data; inspection helpers expose what the
//! workflows created. `fail_next` and `fail_op` inject failures for
//! fail-closed tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::DatabaseError;
use crate::store::model::{
    Bag, CatalogItem, CatalogKind, ChecklistItem, ChecklistRun, ChecklistTemplate, EntityId,
    ErrorReport, Machine, NewBag, NewChecklistRun, NewErrorReport, NewStockReceipt, NewTask,
    ReportKind, ReportPeriod, ReportSummary, Role, StockReceipt, Task, TaskStatus, User,
};
use crate::store::traits::Repository;

#[derive(Default)]
struct Tables {
    next_id: EntityId,
    machines: BTreeMap<EntityId, Machine>,
    catalog: BTreeMap<EntityId, CatalogItem>,
    templates: BTreeMap<EntityId, ChecklistTemplate>,
    users: BTreeMap<EntityId, User>,
    tasks: BTreeMap<EntityId, Task>,
    bags: BTreeMap<EntityId, Bag>,
    checklist_runs: BTreeMap<EntityId, ChecklistRun>,
    error_reports: BTreeMap<EntityId, ErrorReport>,
    stock_receipts: BTreeMap<EntityId, StockReceipt>,
}

impl Tables {
    fn allocate(&mut self) -> EntityId {
        self.next_id += 1;
        self.next_id
    }
}

/// Volatile repository backed by ordered maps.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
    fail_next: AtomicUsize,
    failing_ops: Mutex<HashSet<&'static str>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` repository calls fail with `Unavailable`.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Make every call to the named repository operation fail with
    /// `Unavailable`, e.g. `fail_op("list_users")`.
    pub fn fail_op(&self, op: &'static str) {
        if let Ok(mut ops) = self.failing_ops.lock() {
            ops.insert(op);
        }
    }

    fn check_available(&self, op: &str) -> Result<(), DatabaseError> {
        if self.failing_ops.lock().is_ok_and(|ops| ops.contains(op)) {
            debug!(op, "Injected repository failure");
            return Err(DatabaseError::Unavailable(format!("{op}: injected failure")));
        }
        let pending = self.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next.store(pending - 1, Ordering::SeqCst);
            debug!(op, "Injected repository failure");
            return Err(DatabaseError::Unavailable(format!("{op}: injected failure")));
        }
        Ok(())
    }

    // ── Seeding ─────────────────────────────────────────────────────

    pub async fn add_machine(&self, code: &str, name: &str) -> Machine {
        let mut t = self.tables.write().await;
        let machine = Machine {
            id: t.allocate(),
            code: code.to_string(),
            name: name.to_string(),
            location: None,
        };
        t.machines.insert(machine.id, machine.clone());
        machine
    }

    pub async fn add_catalog_item(&self, kind: CatalogKind, name: &str) -> CatalogItem {
        let mut t = self.tables.write().await;
        let item = CatalogItem {
            id: t.allocate(),
            kind,
            name: name.to_string(),
        };
        t.catalog.insert(item.id, item.clone());
        item
    }

    /// Remove a catalog entry, as an admin deleting it mid-conversation would.
    pub async fn remove_catalog_item(&self, id: EntityId) -> bool {
        self.tables.write().await.catalog.remove(&id).is_some()
    }

    /// Add a template; each step is `(title, requires_photo)`.
    pub async fn add_checklist_template(
        &self,
        name: &str,
        steps: &[(&str, bool)],
    ) -> ChecklistTemplate {
        let mut t = self.tables.write().await;
        let id = t.allocate();
        let mut items = Vec::with_capacity(steps.len());
        for (position, (title, requires_photo)) in steps.iter().enumerate() {
            items.push(ChecklistItem {
                id: t.allocate(),
                position: position as i64,
                title: title.to_string(),
                requires_photo: *requires_photo,
            });
        }
        let template = ChecklistTemplate {
            id,
            name: name.to_string(),
            items,
        };
        t.templates.insert(id, template.clone());
        template
    }

    pub async fn add_user(&self, external_id: &str, name: &str, roles: &[Role]) -> User {
        let mut t = self.tables.write().await;
        let user = User {
            id: t.allocate(),
            external_id: external_id.to_string(),
            name: name.to_string(),
            roles: roles.to_vec(),
        };
        t.users.insert(user.id, user.clone());
        user
    }

    /// Insert a task directly, bypassing the workflows.
    pub async fn insert_task(&self, task: NewTask) -> Task {
        let mut t = self.tables.write().await;
        let now = Utc::now();
        let task = Task {
            id: t.allocate(),
            task_type: task.task_type,
            status: TaskStatus::Created,
            machine_id: task.machine_id,
            items: task.items,
            deadline: task.deadline,
            checklist_template_id: task.checklist_template_id,
            executor_id: task.executor_id,
            creator_id: task.creator_id,
            description: task.description,
            created_at: now,
            updated_at: now,
        };
        t.tasks.insert(task.id, task.clone());
        task
    }

    // ── Inspection ──────────────────────────────────────────────────

    pub async fn tasks(&self) -> Vec<Task> {
        self.tables.read().await.tasks.values().cloned().collect()
    }

    pub async fn bags(&self) -> Vec<Bag> {
        self.tables.read().await.bags.values().cloned().collect()
    }

    pub async fn checklist_runs(&self) -> Vec<ChecklistRun> {
        self.tables.read().await.checklist_runs.values().cloned().collect()
    }

    pub async fn error_reports(&self) -> Vec<ErrorReport> {
        self.tables.read().await.error_reports.values().cloned().collect()
    }

    pub async fn stock_receipts(&self) -> Vec<StockReceipt> {
        self.tables.read().await.stock_receipts.values().cloned().collect()
    }
}

/// Count `labels` into an ordered breakdown.
fn tally<I: IntoIterator<Item = String>>(labels: I) -> Vec<(String, u64)> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for label in labels {
        *counts.entry(label).or_default() += 1;
    }
    counts.into_iter().collect()
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn list_machines(&self) -> Result<Vec<Machine>, DatabaseError> {
        self.check_available("list_machines")?;
        Ok(self.tables.read().await.machines.values().cloned().collect())
    }

    async fn get_machine(&self, id: EntityId) -> Result<Option<Machine>, DatabaseError> {
        self.check_available("get_machine")?;
        Ok(self.tables.read().await.machines.get(&id).cloned())
    }

    async fn list_catalog(&self, kind: CatalogKind) -> Result<Vec<CatalogItem>, DatabaseError> {
        self.check_available("list_catalog")?;
        Ok(self
            .tables
            .read()
            .await
            .catalog
            .values()
            .filter(|i| i.kind == kind)
            .cloned()
            .collect())
    }

    async fn get_catalog_item(
        &self,
        kind: CatalogKind,
        id: EntityId,
    ) -> Result<Option<CatalogItem>, DatabaseError> {
        self.check_available("get_catalog_item")?;
        Ok(self
            .tables
            .read()
            .await
            .catalog
            .get(&id)
            .filter(|i| i.kind == kind)
            .cloned())
    }

    async fn list_checklist_templates(&self) -> Result<Vec<ChecklistTemplate>, DatabaseError> {
        self.check_available("list_checklist_templates")?;
        Ok(self.tables.read().await.templates.values().cloned().collect())
    }

    async fn get_checklist_template(
        &self,
        id: EntityId,
    ) -> Result<Option<ChecklistTemplate>, DatabaseError> {
        self.check_available("get_checklist_template")?;
        Ok(self.tables.read().await.templates.get(&id).cloned())
    }

    async fn list_users(&self, role: Option<Role>) -> Result<Vec<User>, DatabaseError> {
        self.check_available("list_users")?;
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .filter(|u| role.is_none_or(|r| u.has_role(r)))
            .cloned()
            .collect())
    }

    async fn get_user(&self, id: EntityId) -> Result<Option<User>, DatabaseError> {
        self.check_available("get_user")?;
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, DatabaseError> {
        self.check_available("find_user_by_external_id")?;
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|u| u.external_id == external_id)
            .cloned())
    }

    async fn upsert_user(
        &self,
        external_id: &str,
        name: &str,
        roles: &[Role],
    ) -> Result<User, DatabaseError> {
        self.check_available("upsert_user")?;
        let mut t = self.tables.write().await;
        if let Some(user) = t.users.values_mut().find(|u| u.external_id == external_id) {
            for role in roles {
                if !user.roles.contains(role) {
                    user.roles.push(*role);
                }
            }
            return Ok(user.clone());
        }
        let user = User {
            id: t.allocate(),
            external_id: external_id.to_string(),
            name: name.to_string(),
            roles: roles.to_vec(),
        };
        t.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user_roles(&self, id: EntityId, roles: &[Role]) -> Result<(), DatabaseError> {
        self.check_available("update_user_roles")?;
        let mut t = self.tables.write().await;
        let user = t.users.get_mut(&id).ok_or_else(|| DatabaseError::NotFound {
            entity: "user".into(),
            id: id.to_string(),
        })?;
        user.roles = roles.to_vec();
        Ok(())
    }

    async fn create_task(&self, task: NewTask) -> Result<Task, DatabaseError> {
        self.check_available("create_task")?;
        if !self.tables.read().await.machines.contains_key(&task.machine_id) {
            return Err(DatabaseError::Constraint(format!(
                "task references unknown machine {}",
                task.machine_id
            )));
        }
        Ok(self.insert_task(task).await)
    }

    async fn get_task(&self, id: EntityId) -> Result<Option<Task>, DatabaseError> {
        self.check_available("get_task")?;
        Ok(self.tables.read().await.tasks.get(&id).cloned())
    }

    async fn list_open_tasks_for(&self, executor_id: EntityId) -> Result<Vec<Task>, DatabaseError> {
        self.check_available("list_open_tasks_for")?;
        Ok(self
            .tables
            .read()
            .await
            .tasks
            .values()
            .filter(|t| t.executor_id == Some(executor_id) && t.status.is_open())
            .cloned()
            .collect())
    }

    async fn update_task_status(
        &self,
        id: EntityId,
        status: TaskStatus,
    ) -> Result<(), DatabaseError> {
        self.check_available("update_task_status")?;
        let mut t = self.tables.write().await;
        let task = t.tasks.get_mut(&id).ok_or_else(|| DatabaseError::NotFound {
            entity: "task".into(),
            id: id.to_string(),
        })?;
        task.status = status;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn create_bag(&self, bag: NewBag) -> Result<Bag, DatabaseError> {
        self.check_available("create_bag")?;
        let mut t = self.tables.write().await;
        let bag = Bag {
            id: t.allocate(),
            machine_id: bag.machine_id,
            assembled_by: bag.assembled_by,
            lines: bag.lines,
            created_at: Utc::now(),
        };
        t.bags.insert(bag.id, bag.clone());
        Ok(bag)
    }

    async fn create_checklist_run(
        &self,
        run: NewChecklistRun,
    ) -> Result<ChecklistRun, DatabaseError> {
        self.check_available("create_checklist_run")?;
        let mut t = self.tables.write().await;
        let run = ChecklistRun {
            id: t.allocate(),
            template_id: run.template_id,
            task_id: run.task_id,
            performed_by: run.performed_by,
            results: run.results,
            created_at: Utc::now(),
        };
        t.checklist_runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn create_error_report(
        &self,
        report: NewErrorReport,
    ) -> Result<ErrorReport, DatabaseError> {
        self.check_available("create_error_report")?;
        let mut t = self.tables.write().await;
        let report = ErrorReport {
            id: t.allocate(),
            machine_id: report.machine_id,
            reported_by: report.reported_by,
            description: report.description,
            photo: report.photo,
            created_at: Utc::now(),
        };
        t.error_reports.insert(report.id, report.clone());
        Ok(report)
    }

    async fn create_stock_receipt(
        &self,
        receipt: NewStockReceipt,
    ) -> Result<StockReceipt, DatabaseError> {
        self.check_available("create_stock_receipt")?;
        let mut t = self.tables.write().await;
        let receipt = StockReceipt {
            id: t.allocate(),
            received_by: receipt.received_by,
            lines: receipt.lines,
            invoice: receipt.invoice,
            created_at: Utc::now(),
        };
        t.stock_receipts.insert(receipt.id, receipt.clone());
        Ok(receipt)
    }

    async fn report_summary(
        &self,
        kind: ReportKind,
        period: ReportPeriod,
    ) -> Result<ReportSummary, DatabaseError> {
        self.check_available("report_summary")?;
        let t = self.tables.read().await;
        let machine_code = |id: EntityId| {
            t.machines
                .get(&id)
                .map(|m| m.code.clone())
                .unwrap_or_else(|| format!("#{id}"))
        };

        let labels: Vec<String> = match kind {
            ReportKind::Tasks => t
                .tasks
                .values()
                .filter(|x| period.contains(x.created_at))
                .map(|x| x.status.to_string())
                .collect(),
            ReportKind::Bags => t
                .bags
                .values()
                .filter(|x| period.contains(x.created_at))
                .map(|x| machine_code(x.machine_id))
                .collect(),
            ReportKind::Errors => t
                .error_reports
                .values()
                .filter(|x| period.contains(x.created_at))
                .map(|x| machine_code(x.machine_id))
                .collect(),
        };

        Ok(ReportSummary {
            kind,
            period,
            total: labels.len() as u64,
            breakdown: tally(labels),
        })
    }
}
