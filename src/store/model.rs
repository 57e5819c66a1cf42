//! Domain records exchanged with the repository.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Primary key of every repository record.
pub type EntityId = i64;

/// Access role. A user may hold several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Operator,
    Warehouse,
    Guest,
}

impl Role {
    /// Roles an admin may grant.
    pub const ASSIGNABLE: [Role; 4] = [Role::Admin, Role::Manager, Role::Operator, Role::Warehouse];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Operator => "operator",
            Self::Warehouse => "warehouse",
            Self::Guest => "guest",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "manager" => Ok(Self::Manager),
            "operator" => Ok(Self::Operator),
            "warehouse" => Ok(Self::Warehouse),
            "guest" => Ok(Self::Guest),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A vending machine in the fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub id: EntityId,
    /// Short fleet code printed on the machine, e.g. "VM-014".
    pub code: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Machine {
    pub fn label(&self) -> String {
        format!("{} · {}", self.code, self.name)
    }
}

/// The four consumable catalogs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    Ingredient,
    Syrup,
    Water,
    Extra,
}

impl CatalogKind {
    pub const ALL: [CatalogKind; 4] = [
        CatalogKind::Ingredient,
        CatalogKind::Syrup,
        CatalogKind::Water,
        CatalogKind::Extra,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingredient => "ingredient",
            Self::Syrup => "syrup",
            Self::Water => "water",
            Self::Extra => "extra",
        }
    }

    /// Unit the per-item quantity is expressed in.
    pub fn unit(&self) -> &'static str {
        match self {
            Self::Ingredient => "g",
            Self::Syrup | Self::Extra => "pcs",
            Self::Water => "bottles",
        }
    }

    /// Prefix of the action token that selects an item of this catalog.
    pub fn token_prefix(&self) -> &'static str {
        match self {
            Self::Ingredient => "ing",
            Self::Syrup => "syr",
            Self::Water => "wat",
            Self::Extra => "ext",
        }
    }
}

impl std::fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CatalogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingredient" => Ok(Self::Ingredient),
            "syrup" => Ok(Self::Syrup),
            "water" => Ok(Self::Water),
            "extra" => Ok(Self::Extra),
            other => Err(format!("unknown catalog kind: {other}")),
        }
    }
}

/// An entry of one of the consumable catalogs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: EntityId,
    pub kind: CatalogKind,
    pub name: String,
}

/// One step of a checklist template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: EntityId,
    pub position: i64,
    pub title: String,
    /// The operator must attach a photo before giving a verdict.
    pub requires_photo: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistTemplate {
    pub id: EntityId,
    pub name: String,
    pub items: Vec<ChecklistItem>,
}

/// A person known to the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: EntityId,
    /// Identity on the chat transport.
    pub external_id: String,
    pub name: String,
    pub roles: Vec<Role>,
}

impl User {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// What a task asks the executor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Ingredients,
    Water,
    Cleaning,
    Repair,
    Inspection,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::Ingredients,
        TaskType::Water,
        TaskType::Cleaning,
        TaskType::Repair,
        TaskType::Inspection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingredients => "INGREDIENTS",
            Self::Water => "WATER",
            Self::Cleaning => "CLEANING",
            Self::Repair => "REPAIR",
            Self::Inspection => "INSPECTION",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Ingredients => "🥛 Ingredients refill",
            Self::Water => "💧 Water delivery",
            Self::Cleaning => "🧽 Cleaning",
            Self::Repair => "🔧 Repair",
            Self::Inspection => "🔍 Inspection",
        }
    }

    /// Catalog whose items the task carries, if any.
    pub fn catalog(&self) -> Option<CatalogKind> {
        match self {
            Self::Ingredients => Some(CatalogKind::Ingredient),
            Self::Water => Some(CatalogKind::Water),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown task type: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Created | Self::InProgress)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// A catalog item with its quantity, as carried by tasks and receipts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub item_id: EntityId,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub task_type: TaskType,
    pub machine_id: EntityId,
    pub items: Vec<LineItem>,
    pub deadline: Option<NaiveDate>,
    pub checklist_template_id: Option<EntityId>,
    pub executor_id: Option<EntityId>,
    pub creator_id: EntityId,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: EntityId,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub machine_id: EntityId,
    pub items: Vec<LineItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklist_template_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_id: Option<EntityId>,
    pub creator_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One line of a warehouse bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BagLine {
    pub kind: CatalogKind,
    pub item_id: EntityId,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewBag {
    pub machine_id: EntityId,
    pub assembled_by: EntityId,
    pub lines: Vec<BagLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bag {
    pub id: EntityId,
    pub machine_id: EntityId,
    pub assembled_by: EntityId,
    pub lines: Vec<BagLine>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of a single checklist item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistResult {
    pub item_id: EntityId,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewChecklistRun {
    pub template_id: EntityId,
    pub task_id: Option<EntityId>,
    pub performed_by: EntityId,
    pub results: Vec<ChecklistResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistRun {
    pub id: EntityId,
    pub template_id: EntityId,
    pub task_id: Option<EntityId>,
    pub performed_by: EntityId,
    pub results: Vec<ChecklistResult>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewErrorReport {
    pub machine_id: EntityId,
    pub reported_by: EntityId,
    pub description: String,
    pub photo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub id: EntityId,
    pub machine_id: EntityId,
    pub reported_by: EntityId,
    pub description: String,
    pub photo: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStockReceipt {
    pub received_by: EntityId,
    pub lines: Vec<LineItem>,
    pub invoice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockReceipt {
    pub id: EntityId,
    pub received_by: EntityId,
    pub lines: Vec<LineItem>,
    pub invoice: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Tasks,
    Bags,
    Errors,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::Bags => "bags",
            Self::Errors => "errors",
        }
    }
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportPeriod {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl ReportPeriod {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let day = at.date_naive();
        day >= self.from && day <= self.to
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub kind: ReportKind,
    pub period: ReportPeriod,
    pub total: u64,
    /// Label/count pairs, e.g. task status counts or per-machine totals.
    pub breakdown: Vec<(String, u64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_serializes_upper_case() {
        let json = serde_json::to_string(&TaskType::Ingredients).unwrap();
        assert_eq!(json, "\"INGREDIENTS\"");
        assert_eq!("ingredients".parse::<TaskType>().unwrap(), TaskType::Ingredients);
    }

    #[test]
    fn display_matches_serde_for_roles() {
        for role in Role::ASSIGNABLE {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(format!("\"{role}\""), json);
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn only_refill_types_carry_a_catalog() {
        assert_eq!(TaskType::Ingredients.catalog(), Some(CatalogKind::Ingredient));
        assert_eq!(TaskType::Water.catalog(), Some(CatalogKind::Water));
        assert_eq!(TaskType::Repair.catalog(), None);
    }

    #[test]
    fn catalog_prefixes_are_distinct() {
        let mut prefixes: Vec<_> = CatalogKind::ALL.iter().map(|k| k.token_prefix()).collect();
        prefixes.sort();
        prefixes.dedup();
        assert_eq!(prefixes.len(), 4);
    }

    #[test]
    fn report_period_is_inclusive() {
        let period = ReportPeriod {
            from: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            to: NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
        };
        let last_day = NaiveDate::from_ymd_opt(2026, 3, 31)
            .unwrap()
            .and_hms_opt(23, 59, 0)
            .unwrap()
            .and_utc();
        assert!(period.contains(last_day));
        let next = NaiveDate::from_ymd_opt(2026, 4, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        assert!(!period.contains(next));
    }
}
