//! libSQL backend: `Repository` implementation over libsql's async API.
//! Supports local file and in-memory databases.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::model::{
    Bag, CatalogItem, CatalogKind, ChecklistItem, ChecklistRun, ChecklistTemplate, EntityId,
    ErrorReport, LineItem, Machine, NewBag, NewChecklistRun, NewErrorReport, NewStockReceipt,
    NewTask, ReportKind, ReportPeriod, ReportSummary, Role, StockReceipt, Task, TaskStatus,
    TaskType, User,
};
use crate::store::traits::Repository;

/// libSQL repository.
///
/// Stores a single connection that is reused for all operations.
/// Multi-statement writes hold `write_lock` so their transactions never
/// interleave on the shared connection.
pub struct LibSqlRepository {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlRepository {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let repo = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(repo)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to enable foreign keys: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    // ── Reference data ──────────────────────────────────────────────
    //
    // Machines, catalogs and templates are maintained outside the bot;
    // these inserts serve startup seeding and tests.

    pub async fn add_machine(
        &self,
        code: &str,
        name: &str,
        location: Option<&str>,
    ) -> Result<Machine, DatabaseError> {
        let id = insert_returning_id(
            self.conn(),
            "add_machine",
            "INSERT INTO machines (code, name, location) VALUES (?1, ?2, ?3) RETURNING id",
            params![code, name, opt_text(location)],
        )
        .await?;
        Ok(Machine {
            id,
            code: code.to_string(),
            name: name.to_string(),
            location: location.map(String::from),
        })
    }

    pub async fn add_catalog_item(
        &self,
        kind: CatalogKind,
        name: &str,
    ) -> Result<CatalogItem, DatabaseError> {
        let id = insert_returning_id(
            self.conn(),
            "add_catalog_item",
            "INSERT INTO catalog_items (kind, name) VALUES (?1, ?2) RETURNING id",
            params![kind.as_str(), name],
        )
        .await?;
        Ok(CatalogItem {
            id,
            kind,
            name: name.to_string(),
        })
    }

    /// Hide an item from the catalog. Existing records keep referencing it.
    pub async fn deactivate_catalog_item(&self, id: EntityId) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE catalog_items SET active = 0 WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("deactivate_catalog_item: {e}")))?;
        Ok(changed > 0)
    }

    /// Create a template with its items, in order.
    pub async fn add_checklist_template(
        &self,
        name: &str,
        items: &[(&str, bool)],
    ) -> Result<ChecklistTemplate, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let tx = begin(self.conn(), "add_checklist_template").await?;

        let result = async {
            let id = insert_returning_id(
                &tx,
                "add_checklist_template",
                "INSERT INTO checklist_templates (name) VALUES (?1) RETURNING id",
                params![name],
            )
            .await?;

            let mut template_items = Vec::with_capacity(items.len());
            for (position, (title, requires_photo)) in items.iter().enumerate() {
                let position = position as i64;
                let item_id = insert_returning_id(
                    &tx,
                    "add_checklist_template item",
                    "INSERT INTO checklist_items (template_id, position, title, requires_photo) \
                     VALUES (?1, ?2, ?3, ?4) RETURNING id",
                    params![id, position, *title, *requires_photo as i64],
                )
                .await?;
                template_items.push(ChecklistItem {
                    id: item_id,
                    position,
                    title: title.to_string(),
                    requires_photo: *requires_photo,
                });
            }
            Ok::<_, DatabaseError>((id, template_items))
        }
        .await;

        let (id, template_items) = finish(tx, result, "add_checklist_template").await?;
        Ok(ChecklistTemplate {
            id,
            name: name.to_string(),
            items: template_items,
        })
    }

    // ── Row loaders ─────────────────────────────────────────────────

    async fn load_roles(&self, user_id: EntityId) -> Result<Vec<Role>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT role FROM user_roles WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_roles: {e}")))?;

        let mut roles = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let raw: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("load_roles row parse: {e}")))?;
            match raw.parse::<Role>() {
                Ok(role) => roles.push(role),
                Err(e) => tracing::warn!(user_id, "Skipping role row: {e}"),
            }
        }
        roles.sort();
        Ok(roles)
    }

    async fn load_users(
        &self,
        sql: &str,
        args: impl libsql::params::IntoParams,
        op: &str,
    ) -> Result<Vec<User>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, args)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut heads = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id: i64 = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}")))?;
            let external_id: String = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}")))?;
            let name: String = row
                .get(2)
                .map_err(|e| DatabaseError::Query(format!("{op} row parse: {e}")))?;
            heads.push((id, external_id, name));
        }

        let mut users = Vec::with_capacity(heads.len());
        for (id, external_id, name) in heads {
            users.push(User {
                id,
                external_id,
                name,
                roles: self.load_roles(id).await?,
            });
        }
        Ok(users)
    }

    async fn load_task_items(&self, task_id: EntityId) -> Result<Vec<LineItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT item_id, quantity FROM task_items WHERE task_id = ?1 ORDER BY position",
                params![task_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_task_items: {e}")))?;

        let mut items = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let item_id: i64 = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("load_task_items row parse: {e}")))?;
            let quantity: String = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("load_task_items row parse: {e}")))?;
            items.push(LineItem {
                item_id,
                quantity: parse_decimal(&quantity)?,
            });
        }
        Ok(items)
    }

    async fn load_tasks(
        &self,
        sql: &str,
        args: impl libsql::params::IntoParams,
        op: &str,
    ) -> Result<Vec<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, args)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut tasks = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            tasks.push(row_to_task(&row).map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?);
        }
        for task in &mut tasks {
            task.items = self.load_task_items(task.id).await?;
        }
        Ok(tasks)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_decimal(s: &str) -> Result<Decimal, DatabaseError> {
    Decimal::from_str(s).map_err(|e| DatabaseError::Serialization(format!("quantity {s:?}: {e}")))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_int(n: Option<i64>) -> libsql::Value {
    match n {
        Some(n) => libsql::Value::Integer(n),
        None => libsql::Value::Null,
    }
}

fn day(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

async fn insert_returning_id(
    conn: &Connection,
    op: &str,
    sql: &str,
    args: impl libsql::params::IntoParams,
) -> Result<EntityId, DatabaseError> {
    let mut rows = conn.query(sql, args).await.map_err(|e| map_write_error(op, e))?;
    match rows.next().await {
        Ok(Some(row)) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Query(format!("{op} returning id: {e}"))),
        Ok(None) => Err(DatabaseError::Query(format!("{op}: no id returned"))),
        Err(e) => Err(map_write_error(op, e)),
    }
}

/// Constraint violations get their own variant; everything else is a query failure.
fn map_write_error(op: &str, e: libsql::Error) -> DatabaseError {
    let message = e.to_string();
    if message.contains("constraint failed") {
        DatabaseError::Constraint(format!("{op}: {message}"))
    } else {
        DatabaseError::Query(format!("{op}: {message}"))
    }
}

async fn begin(conn: &Connection, op: &str) -> Result<libsql::Transaction, DatabaseError> {
    conn.transaction()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op} begin: {e}")))
}

/// Commit on success, roll back on failure.
async fn finish<T>(
    tx: libsql::Transaction,
    result: Result<T, DatabaseError>,
    op: &str,
) -> Result<T, DatabaseError> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| DatabaseError::Query(format!("{op} commit: {e}")))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!("{op} rollback failed: {rollback}");
            }
            Err(e)
        }
    }
}

const TASK_COLUMNS: &str = "id, task_type, status, machine_id, deadline, checklist_template_id, \
                            executor_id, creator_id, description, created_at, updated_at";

/// Map a row selected with `TASK_COLUMNS`. Items are loaded separately.
fn row_to_task(row: &libsql::Row) -> Result<Task, libsql::Error> {
    let task_type: String = row.get(1)?;
    let status: String = row.get(2)?;
    let deadline: Option<String> = row.get::<String>(4).ok();
    let created: String = row.get(9)?;
    let updated: String = row.get(10)?;

    Ok(Task {
        id: row.get(0)?,
        task_type: TaskType::from_str(&task_type).unwrap_or(TaskType::Inspection),
        status: TaskStatus::from_str(&status).unwrap_or(TaskStatus::Created),
        machine_id: row.get(3)?,
        items: Vec::new(),
        deadline: deadline.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        checklist_template_id: row.get::<i64>(5).ok(),
        executor_id: row.get::<i64>(6).ok(),
        creator_id: row.get(7)?,
        description: row.get::<String>(8).ok(),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_machine(row: &libsql::Row) -> Result<Machine, libsql::Error> {
    Ok(Machine {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        location: row.get::<String>(3).ok(),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Repository for LibSqlRepository {
    // ── Machines ────────────────────────────────────────────────────

    async fn list_machines(&self) -> Result<Vec<Machine>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, code, name, location FROM machines ORDER BY code",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_machines: {e}")))?;

        let mut machines = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_machine(&row) {
                Ok(machine) => machines.push(machine),
                Err(e) => tracing::warn!("Skipping machine row: {e}"),
            }
        }
        Ok(machines)
    }

    async fn get_machine(&self, id: EntityId) -> Result<Option<Machine>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, code, name, location FROM machines WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_machine: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_machine(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_machine row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_machine: {e}"))),
        }
    }

    // ── Catalogs ────────────────────────────────────────────────────

    async fn list_catalog(&self, kind: CatalogKind) -> Result<Vec<CatalogItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, name FROM catalog_items WHERE kind = ?1 AND active = 1 ORDER BY name",
                params![kind.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_catalog: {e}")))?;

        let mut items = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id: i64 = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("list_catalog row parse: {e}")))?;
            let name: String = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("list_catalog row parse: {e}")))?;
            items.push(CatalogItem { id, kind, name });
        }
        Ok(items)
    }

    async fn get_catalog_item(
        &self,
        kind: CatalogKind,
        id: EntityId,
    ) -> Result<Option<CatalogItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT name FROM catalog_items WHERE id = ?1 AND kind = ?2 AND active = 1",
                params![id, kind.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_catalog_item: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let name: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("get_catalog_item row parse: {e}")))?;
                Ok(Some(CatalogItem { id, kind, name }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_catalog_item: {e}"))),
        }
    }

    // ── Checklist templates ─────────────────────────────────────────

    async fn list_checklist_templates(&self) -> Result<Vec<ChecklistTemplate>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT id FROM checklist_templates ORDER BY name", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("list_checklist_templates: {e}")))?;

        let mut ids = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            ids.push(row.get::<i64>(0).map_err(|e| {
                DatabaseError::Query(format!("list_checklist_templates row parse: {e}"))
            })?);
        }

        let mut templates = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(template) = self.get_checklist_template(id).await? {
                templates.push(template);
            }
        }
        Ok(templates)
    }

    async fn get_checklist_template(
        &self,
        id: EntityId,
    ) -> Result<Option<ChecklistTemplate>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT name FROM checklist_templates WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_checklist_template: {e}")))?;

        let name: String = match rows.next().await {
            Ok(Some(row)) => row.get(0).map_err(|e| {
                DatabaseError::Query(format!("get_checklist_template row parse: {e}"))
            })?,
            Ok(None) => return Ok(None),
            Err(e) => return Err(DatabaseError::Query(format!("get_checklist_template: {e}"))),
        };

        let mut rows = self
            .conn()
            .query(
                "SELECT id, position, title, requires_photo FROM checklist_items \
                 WHERE template_id = ?1 ORDER BY position",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_checklist_template items: {e}")))?;

        let mut items = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let parse = |e: libsql::Error| {
                DatabaseError::Query(format!("get_checklist_template item parse: {e}"))
            };
            items.push(ChecklistItem {
                id: row.get(0).map_err(parse)?,
                position: row.get(1).map_err(parse)?,
                title: row.get(2).map_err(parse)?,
                requires_photo: row.get::<i64>(3).map_err(parse)? != 0,
            });
        }
        Ok(Some(ChecklistTemplate { id, name, items }))
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn list_users(&self, role: Option<Role>) -> Result<Vec<User>, DatabaseError> {
        match role {
            None => {
                self.load_users(
                    "SELECT id, external_id, name FROM users ORDER BY name",
                    (),
                    "list_users",
                )
                .await
            }
            Some(role) => {
                self.load_users(
                    "SELECT u.id, u.external_id, u.name FROM users u \
                     JOIN user_roles r ON r.user_id = u.id \
                     WHERE r.role = ?1 ORDER BY u.name",
                    params![role.as_str()],
                    "list_users",
                )
                .await
            }
        }
    }

    async fn get_user(&self, id: EntityId) -> Result<Option<User>, DatabaseError> {
        Ok(self
            .load_users(
                "SELECT id, external_id, name FROM users WHERE id = ?1",
                params![id],
                "get_user",
            )
            .await?
            .pop())
    }

    async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<User>, DatabaseError> {
        Ok(self
            .load_users(
                "SELECT id, external_id, name FROM users WHERE external_id = ?1",
                params![external_id],
                "find_user_by_external_id",
            )
            .await?
            .pop())
    }

    async fn upsert_user(
        &self,
        external_id: &str,
        name: &str,
        roles: &[Role],
    ) -> Result<User, DatabaseError> {
        {
            let _guard = self.write_lock.lock().await;
            let tx = begin(self.conn(), "upsert_user").await?;
            let result = async {
                tx.execute(
                    "INSERT INTO users (external_id, name) VALUES (?1, ?2) \
                     ON CONFLICT(external_id) DO NOTHING",
                    params![external_id, name],
                )
                .await
                .map_err(|e| map_write_error("upsert_user", e))?;
                for role in roles {
                    tx.execute(
                        "INSERT OR IGNORE INTO user_roles (user_id, role) \
                         SELECT id, ?2 FROM users WHERE external_id = ?1",
                        params![external_id, role.as_str()],
                    )
                    .await
                    .map_err(|e| map_write_error("upsert_user role", e))?;
                }
                Ok::<_, DatabaseError>(())
            }
            .await;
            finish(tx, result, "upsert_user").await?;
        }

        debug!(external_id, "User upserted");
        self.find_user_by_external_id(external_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "user".into(),
                id: external_id.to_string(),
            })
    }

    async fn update_user_roles(&self, id: EntityId, roles: &[Role]) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let tx = begin(self.conn(), "update_user_roles").await?;

        let result = async {
            let mut rows = tx
                .query("SELECT 1 FROM users WHERE id = ?1", params![id])
                .await
                .map_err(|e| DatabaseError::Query(format!("update_user_roles: {e}")))?;
            let exists = matches!(rows.next().await, Ok(Some(_)));
            drop(rows);
            if !exists {
                return Err(DatabaseError::NotFound {
                    entity: "user".into(),
                    id: id.to_string(),
                });
            }

            tx.execute("DELETE FROM user_roles WHERE user_id = ?1", params![id])
                .await
                .map_err(|e| map_write_error("update_user_roles", e))?;
            for role in roles {
                tx.execute(
                    "INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?1, ?2)",
                    params![id, role.as_str()],
                )
                .await
                .map_err(|e| map_write_error("update_user_roles", e))?;
            }
            Ok::<_, DatabaseError>(())
        }
        .await;
        finish(tx, result, "update_user_roles").await?;
        debug!(user_id = id, "User roles replaced");
        Ok(())
    }

    // ── Tasks ───────────────────────────────────────────────────────

    async fn create_task(&self, task: NewTask) -> Result<Task, DatabaseError> {
        let now = Utc::now();
        let id = {
            let _guard = self.write_lock.lock().await;
            let tx = begin(self.conn(), "create_task").await?;
            let result = async {
                let id = insert_returning_id(
                    &tx,
                    "create_task",
                    "INSERT INTO tasks (task_type, status, machine_id, deadline, checklist_template_id, \
                     executor_id, creator_id, description, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9) RETURNING id",
                    params![
                        task.task_type.as_str(),
                        TaskStatus::Created.as_str(),
                        task.machine_id,
                        opt_text(task.deadline.map(day).as_deref()),
                        opt_int(task.checklist_template_id),
                        opt_int(task.executor_id),
                        task.creator_id,
                        opt_text(task.description.as_deref()),
                        now.to_rfc3339(),
                    ],
                )
                .await?;

                for (position, line) in task.items.iter().enumerate() {
                    tx.execute(
                        "INSERT INTO task_items (task_id, position, item_id, quantity) \
                         VALUES (?1, ?2, ?3, ?4)",
                        params![id, position as i64, line.item_id, line.quantity.to_string()],
                    )
                    .await
                    .map_err(|e| map_write_error("create_task item", e))?;
                }
                Ok::<_, DatabaseError>(id)
            }
            .await;
            finish(tx, result, "create_task").await?
        };

        debug!(task_id = id, task_type = %task.task_type, "Task inserted into DB");
        Ok(Task {
            id,
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
        })
    }

    async fn get_task(&self, id: EntityId) -> Result<Option<Task>, DatabaseError> {
        Ok(self
            .load_tasks(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                "get_task",
            )
            .await?
            .pop())
    }

    async fn list_open_tasks_for(&self, executor_id: EntityId) -> Result<Vec<Task>, DatabaseError> {
        self.load_tasks(
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks \
                 WHERE executor_id = ?1 AND status IN ('created', 'in_progress') \
                 ORDER BY created_at ASC, id ASC"
            ),
            params![executor_id],
            "list_open_tasks_for",
        )
        .await
    }

    async fn update_task_status(
        &self,
        id: EntityId,
        status: TaskStatus,
    ) -> Result<(), DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), Utc::now().to_rfc3339(), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_task_status: {e}")))?;

        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: "task".into(),
                id: id.to_string(),
            });
        }
        debug!(task_id = id, status = %status, "Task status updated in DB");
        Ok(())
    }

    // ── Workflow products ───────────────────────────────────────────

    async fn create_bag(&self, bag: NewBag) -> Result<Bag, DatabaseError> {
        let now = Utc::now();
        let _guard = self.write_lock.lock().await;
        let tx = begin(self.conn(), "create_bag").await?;
        let result = async {
            let id = insert_returning_id(
                &tx,
                "create_bag",
                "INSERT INTO bags (machine_id, assembled_by, created_at) VALUES (?1, ?2, ?3) RETURNING id",
                params![bag.machine_id, bag.assembled_by, now.to_rfc3339()],
            )
            .await?;

            for (position, line) in bag.lines.iter().enumerate() {
                tx.execute(
                    "INSERT INTO bag_lines (bag_id, position, kind, item_id, quantity) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        id,
                        position as i64,
                        line.kind.as_str(),
                        line.item_id,
                        line.quantity.to_string()
                    ],
                )
                .await
                .map_err(|e| map_write_error("create_bag line", e))?;
            }
            Ok::<_, DatabaseError>(id)
        }
        .await;
        let id = finish(tx, result, "create_bag").await?;

        debug!(bag_id = id, lines = bag.lines.len(), "Bag inserted into DB");
        Ok(Bag {
            id,
            machine_id: bag.machine_id,
            assembled_by: bag.assembled_by,
            lines: bag.lines,
            created_at: now,
        })
    }

    async fn create_checklist_run(
        &self,
        run: NewChecklistRun,
    ) -> Result<ChecklistRun, DatabaseError> {
        let now = Utc::now();
        let _guard = self.write_lock.lock().await;
        let tx = begin(self.conn(), "create_checklist_run").await?;
        let result = async {
            let id = insert_returning_id(
                &tx,
                "create_checklist_run",
                "INSERT INTO checklist_runs (template_id, task_id, performed_by, created_at) \
                 VALUES (?1, ?2, ?3, ?4) RETURNING id",
                params![
                    run.template_id,
                    opt_int(run.task_id),
                    run.performed_by,
                    now.to_rfc3339()
                ],
            )
            .await?;

            for (position, result) in run.results.iter().enumerate() {
                tx.execute(
                    "INSERT INTO checklist_results (run_id, position, item_id, verdict, photo, comment) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        id,
                        position as i64,
                        result.item_id,
                        result.verdict.as_str(),
                        opt_text(result.photo.as_deref()),
                        opt_text(result.comment.as_deref())
                    ],
                )
                .await
                .map_err(|e| map_write_error("create_checklist_run result", e))?;
            }
            Ok::<_, DatabaseError>(id)
        }
        .await;
        let id = finish(tx, result, "create_checklist_run").await?;

        Ok(ChecklistRun {
            id,
            template_id: run.template_id,
            task_id: run.task_id,
            performed_by: run.performed_by,
            results: run.results,
            created_at: now,
        })
    }

    async fn create_error_report(
        &self,
        report: NewErrorReport,
    ) -> Result<ErrorReport, DatabaseError> {
        let now = Utc::now();
        let id = insert_returning_id(
            self.conn(),
            "create_error_report",
            "INSERT INTO error_reports (machine_id, reported_by, description, photo, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id",
            params![
                report.machine_id,
                report.reported_by,
                report.description.as_str(),
                opt_text(report.photo.as_deref()),
                now.to_rfc3339()
            ],
        )
        .await?;

        Ok(ErrorReport {
            id,
            machine_id: report.machine_id,
            reported_by: report.reported_by,
            description: report.description,
            photo: report.photo,
            created_at: now,
        })
    }

    async fn create_stock_receipt(
        &self,
        receipt: NewStockReceipt,
    ) -> Result<StockReceipt, DatabaseError> {
        let now = Utc::now();
        let _guard = self.write_lock.lock().await;
        let tx = begin(self.conn(), "create_stock_receipt").await?;
        let result = async {
            let id = insert_returning_id(
                &tx,
                "create_stock_receipt",
                "INSERT INTO stock_receipts (received_by, invoice, created_at) \
                 VALUES (?1, ?2, ?3) RETURNING id",
                params![
                    receipt.received_by,
                    opt_text(receipt.invoice.as_deref()),
                    now.to_rfc3339()
                ],
            )
            .await?;

            for (position, line) in receipt.lines.iter().enumerate() {
                tx.execute(
                    "INSERT INTO stock_receipt_lines (receipt_id, position, item_id, quantity) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![id, position as i64, line.item_id, line.quantity.to_string()],
                )
                .await
                .map_err(|e| map_write_error("create_stock_receipt line", e))?;
            }
            Ok::<_, DatabaseError>(id)
        }
        .await;
        let id = finish(tx, result, "create_stock_receipt").await?;

        Ok(StockReceipt {
            id,
            received_by: receipt.received_by,
            lines: receipt.lines,
            invoice: receipt.invoice,
            created_at: now,
        })
    }

    // ── Reporting ───────────────────────────────────────────────────

    async fn report_summary(
        &self,
        kind: ReportKind,
        period: ReportPeriod,
    ) -> Result<ReportSummary, DatabaseError> {
        let sql = match kind {
            ReportKind::Tasks => {
                "SELECT status, COUNT(*) FROM tasks \
                 WHERE substr(created_at, 1, 10) BETWEEN ?1 AND ?2 \
                 GROUP BY status ORDER BY status"
            }
            ReportKind::Bags => {
                "SELECT m.code, COUNT(*) FROM bags b JOIN machines m ON m.id = b.machine_id \
                 WHERE substr(b.created_at, 1, 10) BETWEEN ?1 AND ?2 \
                 GROUP BY m.code ORDER BY m.code"
            }
            ReportKind::Errors => {
                "SELECT m.code, COUNT(*) FROM error_reports e JOIN machines m ON m.id = e.machine_id \
                 WHERE substr(e.created_at, 1, 10) BETWEEN ?1 AND ?2 \
                 GROUP BY m.code ORDER BY m.code"
            }
        };

        let mut rows = self
            .conn()
            .query(sql, params![day(period.from), day(period.to)])
            .await
            .map_err(|e| DatabaseError::Query(format!("report_summary: {e}")))?;

        let mut breakdown = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let label: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("report_summary row parse: {e}")))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("report_summary row parse: {e}")))?;
            breakdown.push((label, count.max(0) as u64));
        }

        Ok(ReportSummary {
            kind,
            period,
            total: breakdown.iter().map(|(_, n)| n).sum(),
            breakdown,
        })
    }
}
