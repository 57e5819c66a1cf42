//! End-to-end dialogues driven through the event router, with the
//! in-memory repository and a recording transport standing in for the
//! database and the chat platform.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal_macros::dec;

use vendbot::channels::RecordingTransport;
use vendbot::notify::TransportNotifier;
use vendbot::scenes::{self, WorkflowData, WorkflowId};
use vendbot::store::InMemoryRepository;
use vendbot::store::Repository;
use vendbot::store::model::{BagLine, CatalogKind, LineItem, NewTask, Role, TaskStatus, TaskType, User};
use vendbot::workflow::role::DENIAL_NOTICE;
use vendbot::workflow::router::{CANCELLED_NOTICE, FAILURE_NOTICE};
use vendbot::workflow::{
    Accept, Actor, CANCEL, Dispatch, Event, EventRouter, MediaKind, Session, SessionStore,
};

const STALE: &str = "⚠️ That option is no longer available. Please choose again.";

struct Harness {
    repo: Arc<InMemoryRepository>,
    transport: Arc<RecordingTransport>,
    router: EventRouter,
}

impl Harness {
    fn new() -> Self {
        let repo = Arc::new(InMemoryRepository::new());
        let transport = Arc::new(RecordingTransport::new());
        let notifier = Arc::new(TransportNotifier::new(transport.clone()));
        let router = EventRouter::new(
            scenes::registry(),
            Arc::new(SessionStore::new()),
            repo.clone(),
            transport.clone(),
            notifier,
            Duration::from_secs(5),
        );
        Self {
            repo,
            transport,
            router,
        }
    }

    async fn user(&self, external_id: &str, roles: &[Role]) -> (User, Actor) {
        let user = self.repo.add_user(external_id, external_id, roles).await;
        let actor = Actor::from_user(&user);
        (user, actor)
    }

    async fn send(&self, actor: &Actor, event: Event) -> Dispatch {
        self.router.dispatch(actor, event).await
    }

    async fn session(&self, actor: &Actor) -> Session {
        self.router
            .sessions()
            .get(&actor.user_id)
            .await
            .lock()
            .await
            .clone()
    }

    async fn state(&self, actor: &Actor) -> Option<String> {
        self.session(actor)
            .await
            .state()
            .map(|s| s.as_str().to_string())
    }
}

// ── Task creation ───────────────────────────────────────────────────────

#[tokio::test]
async fn ingredient_task_keeps_only_the_final_selection() {
    let h = Harness::new();
    let (manager, mia) = h.user("100", &[Role::Manager]).await;
    let machine = h.repo.add_machine("VM-1", "Lobby").await;
    let sugar = h.repo.add_catalog_item(CatalogKind::Ingredient, "Sugar").await;
    let milk = h.repo.add_catalog_item(CatalogKind::Ingredient, "Milk").await;

    assert_eq!(
        h.send(&mia, Event::command("/newtask")).await,
        Dispatch::Entered(WorkflowId::CreateTask)
    );
    h.send(&mia, Event::action("type:INGREDIENTS")).await;
    h.send(&mia, Event::action(format!("machine:{}", machine.id))).await;
    assert_eq!(h.state(&mia).await.as_deref(), Some("select_ingredients"));

    // Sugar on, sugar off, milk on.
    h.send(&mia, Event::action(format!("ing:{}", sugar.id))).await;
    h.send(&mia, Event::action(format!("ing:{}", sugar.id))).await;
    h.send(&mia, Event::action(format!("ing:{}", milk.id))).await;
    h.send(&mia, Event::action("done")).await;
    assert_eq!(h.state(&mia).await.as_deref(), Some("item_quantities"));

    h.send(&mia, Event::text("250")).await;
    assert_eq!(h.state(&mia).await.as_deref(), Some("deadline"));
    h.send(&mia, Event::text("tomorrow")).await;
    h.send(&mia, Event::command("/skip")).await;
    h.send(&mia, Event::command("/skip")).await;
    h.send(&mia, Event::command("/skip")).await;
    assert_eq!(h.state(&mia).await.as_deref(), Some("confirm"));
    assert_eq!(h.send(&mia, Event::action("confirm")).await, Dispatch::Left);

    let tasks = h.repo.tasks().await;
    assert_eq!(tasks.len(), 1);
    let task = &tasks[0];
    assert_eq!(task.task_type, TaskType::Ingredients);
    assert_eq!(task.machine_id, machine.id);
    assert_eq!(task.creator_id, manager.id);
    assert_eq!(
        task.items,
        vec![LineItem {
            item_id: milk.id,
            quantity: dec!(250),
        }]
    );
    assert_eq!(
        task.deadline,
        Some(Utc::now().date_naive() + chrono::Duration::days(1))
    );
    assert!(task.executor_id.is_none());
    assert!(h.session(&mia).await.is_idle());
    assert!(
        h.transport
            .notices(&mia.user_id)
            .await
            .iter()
            .any(|n| n.contains(&format!("Task #{} created", task.id)))
    );
}

#[tokio::test]
async fn empty_selection_skips_the_quantity_step() {
    let h = Harness::new();
    let (_, mia) = h.user("100", &[Role::Admin]).await;
    let machine = h.repo.add_machine("VM-1", "Lobby").await;
    h.repo.add_catalog_item(CatalogKind::Ingredient, "Sugar").await;

    h.send(&mia, Event::command("/newtask")).await;
    h.send(&mia, Event::action("type:INGREDIENTS")).await;
    h.send(&mia, Event::action(format!("machine:{}", machine.id))).await;
    h.send(&mia, Event::action("done")).await;

    assert_eq!(h.state(&mia).await.as_deref(), Some("deadline"));
}

#[tokio::test]
async fn invalid_quantity_leaves_the_draft_untouched() {
    let h = Harness::new();
    let (_, mia) = h.user("100", &[Role::Manager]).await;
    let machine = h.repo.add_machine("VM-1", "Lobby").await;
    let sugar = h.repo.add_catalog_item(CatalogKind::Ingredient, "Sugar").await;

    h.send(&mia, Event::command("/newtask")).await;
    h.send(&mia, Event::action("type:INGREDIENTS")).await;
    h.send(&mia, Event::action(format!("machine:{}", machine.id))).await;
    h.send(&mia, Event::action(format!("ing:{}", sugar.id))).await;
    h.send(&mia, Event::action("done")).await;
    let before = h.session(&mia).await;

    assert_eq!(h.send(&mia, Event::text("a lot")).await, Dispatch::Handled);

    let after = h.session(&mia).await;
    assert_eq!(after.state(), before.state());
    assert_eq!(
        after.active.map(|a| a.data),
        before.active.map(|a| a.data)
    );
}

#[tokio::test]
async fn removed_catalog_item_sends_the_user_back_to_the_selection() {
    let h = Harness::new();
    let (_, mia) = h.user("100", &[Role::Manager]).await;
    let machine = h.repo.add_machine("VM-1", "Lobby").await;
    let sugar = h.repo.add_catalog_item(CatalogKind::Ingredient, "Sugar").await;

    h.send(&mia, Event::command("/newtask")).await;
    h.send(&mia, Event::action("type:INGREDIENTS")).await;
    h.send(&mia, Event::action(format!("machine:{}", machine.id))).await;
    let before = h.session(&mia).await;

    assert!(h.repo.remove_catalog_item(sugar.id).await);
    h.send(&mia, Event::action(format!("ing:{}", sugar.id))).await;

    let after = h.session(&mia).await;
    assert_eq!(h.state(&mia).await.as_deref(), Some("select_ingredients"));
    let data = after.active.map(|a| a.data);
    assert_eq!(data, before.active.map(|a| a.data));
    let Some(WorkflowData::CreateTask(draft)) = data else {
        panic!("expected a task draft");
    };
    assert!(draft.items.is_some_and(|ms| ms.entries.is_empty()));
    assert_eq!(h.transport.last_notice(&mia.user_id).await.as_deref(), Some(STALE));
}

#[tokio::test]
async fn wrong_catalog_token_is_ignored() {
    let h = Harness::new();
    let (_, mia) = h.user("100", &[Role::Manager]).await;
    let machine = h.repo.add_machine("VM-1", "Lobby").await;
    h.repo.add_catalog_item(CatalogKind::Ingredient, "Sugar").await;
    let still = h.repo.add_catalog_item(CatalogKind::Water, "Still").await;

    h.send(&mia, Event::command("/newtask")).await;
    h.send(&mia, Event::action("type:INGREDIENTS")).await;
    h.send(&mia, Event::action(format!("machine:{}", machine.id))).await;
    let before = h.session(&mia).await;
    let sent = h.transport.outbound_for(&mia.user_id).await.len();

    assert_eq!(
        h.send(&mia, Event::action(format!("wat:{}", still.id))).await,
        Dispatch::Ignored
    );

    let after = h.session(&mia).await;
    assert_eq!(h.state(&mia).await.as_deref(), Some("select_ingredients"));
    assert_eq!(
        after.active.map(|a| a.data),
        before.active.map(|a| a.data)
    );
    assert_eq!(h.transport.outbound_for(&mia.user_id).await.len(), sent);
}

#[tokio::test]
async fn water_task_selects_from_the_water_catalog() {
    let h = Harness::new();
    let (_, mia) = h.user("100", &[Role::Manager]).await;
    let machine = h.repo.add_machine("VM-1", "Lobby").await;
    let sugar = h.repo.add_catalog_item(CatalogKind::Ingredient, "Sugar").await;
    let still = h.repo.add_catalog_item(CatalogKind::Water, "Still").await;

    h.send(&mia, Event::command("/newtask")).await;
    h.send(&mia, Event::action("type:WATER")).await;
    h.send(&mia, Event::action(format!("machine:{}", machine.id))).await;
    assert_eq!(h.state(&mia).await.as_deref(), Some("select_water"));

    assert_eq!(
        h.send(&mia, Event::action(format!("ing:{}", sugar.id))).await,
        Dispatch::Ignored
    );
    h.send(&mia, Event::action(format!("wat:{}", still.id))).await;
    h.send(&mia, Event::action("done")).await;
    assert_eq!(h.state(&mia).await.as_deref(), Some("item_quantities"));
}

#[tokio::test]
async fn huge_relative_deadline_is_refused() {
    let h = Harness::new();
    let (_, mia) = h.user("100", &[Role::Manager]).await;
    let machine = h.repo.add_machine("VM-1", "Lobby").await;

    h.send(&mia, Event::command("/newtask")).await;
    h.send(&mia, Event::action("type:REPAIR")).await;
    h.send(&mia, Event::action(format!("machine:{}", machine.id))).await;
    assert_eq!(h.state(&mia).await.as_deref(), Some("deadline"));

    assert_eq!(h.send(&mia, Event::text("+999999999")).await, Dispatch::Handled);
    assert_eq!(h.state(&mia).await.as_deref(), Some("deadline"));
    assert!(h.repo.tasks().await.is_empty());
    let notices = h.transport.notices(&mia.user_id).await;
    assert!(notices.iter().any(|n| n.contains("too far ahead")));
    assert!(!notices.contains(&FAILURE_NOTICE.to_string()));
}

// ── Bag assembly ────────────────────────────────────────────────────────

#[tokio::test]
async fn skipped_extra_amount_defaults_to_one() {
    let h = Harness::new();
    let (worker, wes) = h.user("200", &[Role::Warehouse]).await;
    let machine = h.repo.add_machine("VM-2", "Station").await;
    h.repo.add_catalog_item(CatalogKind::Ingredient, "Sugar").await;
    let cups = h.repo.add_catalog_item(CatalogKind::Extra, "Cups").await;

    assert_eq!(
        h.send(&wes, Event::command("/bag")).await,
        Dispatch::Entered(WorkflowId::BagAssembly)
    );
    h.send(&wes, Event::action(format!("machine:{}", machine.id))).await;
    h.send(&wes, Event::action("done")).await;
    h.send(&wes, Event::action("done")).await;
    h.send(&wes, Event::action("done")).await;
    assert_eq!(h.state(&wes).await.as_deref(), Some("extras"));

    h.send(&wes, Event::action(format!("ext:{}", cups.id))).await;
    h.send(&wes, Event::action("done")).await;
    assert_eq!(h.state(&wes).await.as_deref(), Some("extra_amounts"));
    h.send(&wes, Event::command("/skip")).await;
    assert_eq!(h.state(&wes).await.as_deref(), Some("confirm"));
    assert_eq!(h.send(&wes, Event::action("confirm")).await, Dispatch::Left);

    let bags = h.repo.bags().await;
    assert_eq!(bags.len(), 1);
    assert_eq!(bags[0].assembled_by, worker.id);
    assert_eq!(
        bags[0].lines,
        vec![BagLine {
            kind: CatalogKind::Extra,
            item_id: cups.id,
            quantity: dec!(1),
        }]
    );
}

// ── Task execution with a nested checklist ──────────────────────────────

#[tokio::test]
async fn checklist_result_returns_to_the_task() {
    let h = Harness::new();
    let (manager, _) = h.user("100", &[Role::Manager]).await;
    let (operator, olga) = h.user("300", &[Role::Operator]).await;
    let machine = h.repo.add_machine("VM-3", "Mall").await;
    let template = h
        .repo
        .add_checklist_template("Cleaning", &[("Wipe the panel", false), ("Empty the tray", false)])
        .await;
    let task = h
        .repo
        .insert_task(NewTask {
            task_type: TaskType::Cleaning,
            machine_id: machine.id,
            items: Vec::new(),
            deadline: None,
            checklist_template_id: Some(template.id),
            executor_id: Some(operator.id),
            creator_id: manager.id,
            description: None,
        })
        .await;

    assert_eq!(
        h.send(&olga, Event::command("/mytasks")).await,
        Dispatch::Entered(WorkflowId::TaskExecution)
    );
    h.send(&olga, Event::action(format!("task:{}", task.id))).await;

    // Completing before the checklist is refused.
    h.send(&olga, Event::action("complete")).await;
    assert_eq!(
        h.repo.get_task(task.id).await.unwrap().unwrap().status,
        TaskStatus::Created
    );

    assert_eq!(
        h.send(&olga, Event::action("run_checklist")).await,
        Dispatch::Entered(WorkflowId::Checklist)
    );
    assert_eq!(h.state(&olga).await.as_deref(), Some("item"));
    h.send(&olga, Event::action("ok")).await;
    h.send(&olga, Event::action("ok")).await;
    assert_eq!(h.state(&olga).await.as_deref(), Some("confirm"));
    assert_eq!(
        h.send(&olga, Event::action("submit")).await,
        Dispatch::Entered(WorkflowId::TaskExecution)
    );

    let session = h.session(&olga).await;
    assert_eq!(session.workflow(), Some(WorkflowId::TaskExecution));
    assert_eq!(session.state().map(|s| s.as_str()), Some("task"));
    assert!(session.return_to.is_none());
    let data = session.active.expect("active workflow").data;
    let d = data.task_execution().unwrap();
    assert_eq!(d.task_id, Some(task.id));
    let outcome = d.checklist.as_ref().expect("checklist outcome");
    assert_eq!(outcome.template_id, template.id);
    assert_eq!((outcome.passed, outcome.failed), (2, 0));

    let runs = h.repo.checklist_runs().await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].task_id, Some(task.id));

    assert_eq!(h.send(&olga, Event::action("complete")).await, Dispatch::Left);
    assert_eq!(
        h.repo.get_task(task.id).await.unwrap().unwrap().status,
        TaskStatus::Completed
    );
    assert!(!h.transport.notices(&manager.external_id).await.is_empty());
}

#[tokio::test]
async fn cancel_inside_checklist_returns_to_the_task() {
    let h = Harness::new();
    let (manager, _) = h.user("100", &[Role::Manager]).await;
    let (operator, olga) = h.user("300", &[Role::Operator]).await;
    let machine = h.repo.add_machine("VM-3", "Mall").await;
    let template = h
        .repo
        .add_checklist_template("Inspection", &[("Check the coins", false)])
        .await;
    let task = h
        .repo
        .insert_task(NewTask {
            task_type: TaskType::Inspection,
            machine_id: machine.id,
            items: Vec::new(),
            deadline: None,
            checklist_template_id: Some(template.id),
            executor_id: Some(operator.id),
            creator_id: manager.id,
            description: None,
        })
        .await;

    h.send(&olga, Event::command("/mytasks")).await;
    h.send(&olga, Event::action(format!("task:{}", task.id))).await;
    h.send(&olga, Event::action("run_checklist")).await;

    assert_eq!(
        h.send(&olga, Event::command("/cancel")).await,
        Dispatch::Cancelled
    );
    assert_eq!(
        h.session(&olga).await.workflow(),
        Some(WorkflowId::TaskExecution)
    );
    assert!(h.repo.checklist_runs().await.is_empty());
}

#[tokio::test]
async fn completion_survives_a_failed_creator_lookup() {
    let h = Harness::new();
    let (manager, _) = h.user("100", &[Role::Manager]).await;
    let (operator, olga) = h.user("300", &[Role::Operator]).await;
    let machine = h.repo.add_machine("VM-3", "Mall").await;
    let task = h
        .repo
        .insert_task(NewTask {
            task_type: TaskType::Repair,
            machine_id: machine.id,
            items: Vec::new(),
            deadline: None,
            checklist_template_id: None,
            executor_id: Some(operator.id),
            creator_id: manager.id,
            description: None,
        })
        .await;

    h.send(&olga, Event::command("/mytasks")).await;
    h.send(&olga, Event::action(format!("task:{}", task.id))).await;
    h.repo.fail_op("get_user");

    assert_eq!(h.send(&olga, Event::action("complete")).await, Dispatch::Left);
    assert_eq!(
        h.repo.get_task(task.id).await.unwrap().unwrap().status,
        TaskStatus::Completed
    );
    assert!(h.session(&olga).await.is_idle());
    assert!(
        !h.transport
            .notices(&olga.user_id)
            .await
            .contains(&FAILURE_NOTICE.to_string())
    );
    assert!(h.transport.notices(&manager.external_id).await.is_empty());
}

// ── Cross-cutting behaviour ─────────────────────────────────────────────

#[tokio::test]
async fn cancel_discards_the_draft() {
    let h = Harness::new();
    let (_, mia) = h.user("100", &[Role::Manager]).await;
    let machine = h.repo.add_machine("VM-1", "Lobby").await;

    h.send(&mia, Event::command("/newtask")).await;
    h.send(&mia, Event::action("type:CLEANING")).await;
    h.send(&mia, Event::action(format!("machine:{}", machine.id))).await;

    assert_eq!(
        h.send(&mia, Event::command("/cancel")).await,
        Dispatch::Cancelled
    );
    assert!(h.session(&mia).await.is_idle());
    assert!(h.repo.tasks().await.is_empty());
    assert!(
        h.transport
            .notices(&mia.user_id)
            .await
            .contains(&CANCELLED_NOTICE.to_string())
    );
}

#[tokio::test]
async fn guests_are_denied() {
    let h = Harness::new();
    let stranger = Actor::guest("999", "Stranger");

    assert_eq!(
        h.send(&stranger, Event::command("/newtask")).await,
        Dispatch::Denied
    );
    assert!(h.session(&stranger).await.is_idle());
    assert_eq!(
        h.transport.last_notice("999").await.as_deref(),
        Some(DENIAL_NOTICE)
    );
}

#[tokio::test]
async fn revoked_role_stops_the_workflow() {
    let h = Harness::new();
    let (manager, mia) = h.user("100", &[Role::Manager]).await;

    h.send(&mia, Event::command("/newtask")).await;
    h.repo
        .update_user_roles(manager.id, &[Role::Operator])
        .await
        .unwrap();
    let demoted = Actor::from_user(&h.repo.get_user(manager.id).await.unwrap().unwrap());

    assert_eq!(
        h.send(&demoted, Event::action("type:REPAIR")).await,
        Dispatch::Denied
    );
    assert!(h.session(&demoted).await.is_idle());
    assert!(h.repo.tasks().await.is_empty());
}

#[tokio::test]
async fn repository_failure_aborts_to_idle() {
    let h = Harness::new();
    let (_, mia) = h.user("100", &[Role::Manager]).await;
    let machine = h.repo.add_machine("VM-1", "Lobby").await;

    h.send(&mia, Event::command("/newtask")).await;
    h.send(&mia, Event::action("type:REPAIR")).await;
    h.repo.fail_next(1);

    assert_eq!(
        h.send(&mia, Event::action(format!("machine:{}", machine.id))).await,
        Dispatch::Aborted
    );
    assert!(h.session(&mia).await.is_idle());
    assert_eq!(
        h.transport.last_notice(&mia.user_id).await.as_deref(),
        Some(FAILURE_NOTICE)
    );
}

#[tokio::test]
async fn entry_command_replaces_the_running_workflow() {
    let h = Harness::new();
    let (_, ada) = h.user("1", &[Role::Admin]).await;

    h.send(&ada, Event::command("/newtask")).await;
    assert_eq!(
        h.send(&ada, Event::command("/bag")).await,
        Dispatch::Entered(WorkflowId::BagAssembly)
    );
    let session = h.session(&ada).await;
    assert_eq!(session.workflow(), Some(WorkflowId::BagAssembly));
    assert!(session.return_to.is_none());
}

#[tokio::test]
async fn idle_chatter_is_ignored() {
    let h = Harness::new();
    let (_, ada) = h.user("1", &[Role::Admin]).await;

    assert_eq!(h.send(&ada, Event::text("hello?")).await, Dispatch::Ignored);
    assert!(h.transport.outbound_for(&ada.user_id).await.is_empty());
}

// ── Stock and error reports ─────────────────────────────────────────────

#[tokio::test]
async fn stock_receipt_keeps_the_invoice() {
    let h = Harness::new();
    let (keeper, wes) = h.user("200", &[Role::Warehouse]).await;
    let beans = h.repo.add_catalog_item(CatalogKind::Ingredient, "Beans").await;

    h.send(&wes, Event::command("/receive")).await;
    h.send(&wes, Event::action(format!("ing:{}", beans.id))).await;
    h.send(&wes, Event::action("done")).await;
    h.send(&wes, Event::text("12.5")).await;
    assert_eq!(h.state(&wes).await.as_deref(), Some("invoice"));
    h.send(&wes, Event::media(MediaKind::Document, "file-77")).await;
    assert_eq!(h.send(&wes, Event::action("confirm")).await, Dispatch::Left);

    let receipts = h.repo.stock_receipts().await;
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].received_by, keeper.id);
    assert_eq!(receipts[0].invoice.as_deref(), Some("file-77"));
    assert_eq!(
        receipts[0].lines,
        vec![LineItem {
            item_id: beans.id,
            quantity: dec!(12.5),
        }]
    );
}

#[tokio::test]
async fn error_report_alerts_managers_but_not_the_reporter() {
    let h = Harness::new();
    let (manager, _) = h.user("100", &[Role::Manager]).await;
    let (admin, ada) = h.user("1", &[Role::Admin]).await;
    let (_, olga) = h.user("300", &[Role::Operator]).await;
    let machine = h.repo.add_machine("VM-9", "Gym").await;

    h.send(&olga, Event::command("/error")).await;
    h.send(&olga, Event::action(format!("machine:{}", machine.id))).await;
    assert_eq!(h.send(&olga, Event::text("   ")).await, Dispatch::Handled);
    assert_eq!(h.state(&olga).await.as_deref(), Some("describe"));
    h.send(&olga, Event::text("Bill acceptor rejects notes")).await;
    h.send(&olga, Event::media(MediaKind::Photo, "photo-1")).await;
    assert_eq!(h.send(&olga, Event::action("confirm")).await, Dispatch::Left);

    let reports = h.repo.error_reports().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].description, "Bill acceptor rejects notes");
    assert_eq!(reports[0].photo.as_deref(), Some("photo-1"));
    assert!(!h.transport.notices(&manager.external_id).await.is_empty());
    assert!(!h.transport.notices(&admin.external_id).await.is_empty());

    // An admin reporting is not told about their own report.
    h.transport.clear().await;
    h.send(&ada, Event::command("/error")).await;
    h.send(&ada, Event::action(format!("machine:{}", machine.id))).await;
    h.send(&ada, Event::text("Display is dark")).await;
    h.send(&ada, Event::command("/skip")).await;
    h.send(&ada, Event::action("confirm")).await;
    assert!(
        h.transport
            .notices(&ada.user_id)
            .await
            .iter()
            .all(|n| !n.contains("Display is dark"))
    );
    assert_eq!(h.repo.error_reports().await.len(), 2);
}

#[tokio::test]
async fn error_report_survives_a_failed_recipient_lookup() {
    let h = Harness::new();
    let (manager, _) = h.user("100", &[Role::Manager]).await;
    let (_, olga) = h.user("300", &[Role::Operator]).await;
    let machine = h.repo.add_machine("VM-9", "Gym").await;

    h.send(&olga, Event::command("/error")).await;
    h.send(&olga, Event::action(format!("machine:{}", machine.id))).await;
    h.send(&olga, Event::text("Coin slot jammed")).await;
    h.send(&olga, Event::command("/skip")).await;
    assert_eq!(h.state(&olga).await.as_deref(), Some("confirm"));
    h.repo.fail_op("list_users");

    assert_eq!(h.send(&olga, Event::action("confirm")).await, Dispatch::Left);
    let reports = h.repo.error_reports().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].description, "Coin slot jammed");
    assert!(h.session(&olga).await.is_idle());
    assert!(
        !h.transport
            .notices(&olga.user_id)
            .await
            .contains(&FAILURE_NOTICE.to_string())
    );
    assert!(h.transport.notices(&manager.external_id).await.is_empty());
}

// ── Cancel from every state ─────────────────────────────────────────────

#[test]
fn every_state_declares_cancel() {
    for def in scenes::registry().definitions() {
        for state in def.states {
            assert!(
                state.accepts.contains(&Accept::Command(CANCEL)),
                "{}/{} does not accept /cancel",
                def.id,
                state.name
            );
        }
    }
}

/// A scripted walk from an entry command through every state of one
/// workflow.
struct Walk {
    workflow: WorkflowId,
    command: &'static str,
    steps: Vec<Event>,
}

/// Reference data for the walks, seeded identically on every call so
/// the ids line up between harnesses.
async fn walk_fixture() -> (Harness, Actor, Vec<Walk>) {
    let h = Harness::new();
    let (admin, ada) = h.user("1", &[Role::Admin]).await;
    let (operator, _) = h.user("300", &[Role::Operator]).await;
    let machine = h.repo.add_machine("VM-1", "Lobby").await;
    let sugar = h.repo.add_catalog_item(CatalogKind::Ingredient, "Sugar").await;
    let vanilla = h.repo.add_catalog_item(CatalogKind::Syrup, "Vanilla").await;
    let still = h.repo.add_catalog_item(CatalogKind::Water, "Still").await;
    let cups = h.repo.add_catalog_item(CatalogKind::Extra, "Cups").await;
    let template = h
        .repo
        .add_checklist_template("Daily", &[("Wipe the panel", false)])
        .await;
    let task = h
        .repo
        .insert_task(NewTask {
            task_type: TaskType::Cleaning,
            machine_id: machine.id,
            items: Vec::new(),
            deadline: None,
            checklist_template_id: Some(template.id),
            executor_id: Some(admin.id),
            creator_id: admin.id,
            description: None,
        })
        .await;

    let pick = |prefix: &str, id| Event::action(format!("{prefix}:{id}"));
    let skip = || Event::command("/skip");
    let done = || Event::action("done");
    let walks = vec![
        Walk {
            workflow: WorkflowId::CreateTask,
            command: "/newtask",
            steps: vec![
                Event::action("type:INGREDIENTS"),
                pick("machine", machine.id),
                pick("ing", sugar.id),
                done(),
                Event::text("5"),
                skip(),
                skip(),
                skip(),
                skip(),
            ],
        },
        Walk {
            workflow: WorkflowId::CreateTask,
            command: "/newtask",
            steps: vec![
                Event::action("type:WATER"),
                pick("machine", machine.id),
                pick("wat", still.id),
            ],
        },
        Walk {
            workflow: WorkflowId::BagAssembly,
            command: "/bag",
            steps: vec![
                pick("machine", machine.id),
                pick("ing", sugar.id),
                done(),
                Event::text("5"),
                pick("syr", vanilla.id),
                done(),
                Event::text("2"),
                pick("wat", still.id),
                done(),
                Event::text("1"),
                pick("ext", cups.id),
                done(),
                skip(),
            ],
        },
        Walk {
            workflow: WorkflowId::Checklist,
            command: "/checklist",
            steps: vec![pick("tpl", template.id), Event::action("ok")],
        },
        Walk {
            workflow: WorkflowId::TaskExecution,
            command: "/mytasks",
            steps: vec![pick("task", task.id), Event::action("photo")],
        },
        Walk {
            workflow: WorkflowId::ReceiveStock,
            command: "/receive",
            steps: vec![pick("ing", sugar.id), done(), Event::text("5"), skip()],
        },
        Walk {
            workflow: WorkflowId::Report,
            command: "/report",
            steps: vec![Event::action("tasks")],
        },
        Walk {
            workflow: WorkflowId::ErrorReport,
            command: "/error",
            steps: vec![
                pick("machine", machine.id),
                Event::text("Display is dark"),
                skip(),
            ],
        },
        Walk {
            workflow: WorkflowId::ManageUsers,
            command: "/users",
            steps: vec![pick("user", operator.id), done()],
        },
    ];
    (h, ada, walks)
}

#[tokio::test]
async fn cancel_from_any_state_discards_everything() {
    let (_, _, walks) = walk_fixture().await;
    let mut visited: HashSet<(WorkflowId, String)> = HashSet::new();

    for (index, walk) in walks.iter().enumerate() {
        for depth in 0..=walk.steps.len() {
            let (h, ada, mut fresh) = walk_fixture().await;
            let walk = fresh.swap_remove(index);

            assert_eq!(
                h.send(&ada, Event::command(walk.command)).await,
                Dispatch::Entered(walk.workflow)
            );
            for step in walk.steps.into_iter().take(depth) {
                assert_eq!(h.send(&ada, step).await, Dispatch::Handled);
            }
            let state = h.state(&ada).await.expect("inside the workflow");
            assert_eq!(h.session(&ada).await.workflow(), Some(walk.workflow));
            visited.insert((walk.workflow, state.clone()));

            assert_eq!(
                h.send(&ada, Event::command("/cancel")).await,
                Dispatch::Cancelled,
                "{}/{state}",
                walk.workflow
            );
            assert!(h.session(&ada).await.is_idle(), "{}/{state}", walk.workflow);
            assert_eq!(
                h.transport.last_notice(&ada.user_id).await.as_deref(),
                Some(CANCELLED_NOTICE)
            );

            let tasks = h.repo.tasks().await;
            assert_eq!(tasks.len(), 1);
            assert_eq!(tasks[0].status, TaskStatus::Created);
            assert!(h.repo.bags().await.is_empty());
            assert!(h.repo.checklist_runs().await.is_empty());
            assert!(h.repo.error_reports().await.is_empty());
            assert!(h.repo.stock_receipts().await.is_empty());
            let roles: Vec<Vec<Role>> = h
                .repo
                .list_users(None)
                .await
                .unwrap()
                .into_iter()
                .map(|u| u.roles)
                .collect();
            assert_eq!(roles, vec![vec![Role::Admin], vec![Role::Operator]]);
        }
    }

    for def in scenes::registry().definitions() {
        for state in def.states {
            assert!(
                visited.contains(&(def.id, state.name.to_string())),
                "walks never reached {}/{}",
                def.id,
                state.name
            );
        }
    }
}
