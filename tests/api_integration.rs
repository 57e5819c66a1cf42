//! Integration tests for the status API.
//!
//! Each test spins up an Axum server on a random port over an in-memory
//! libSQL database and talks to it with reqwest.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::timeout;

use vendbot::api::{ApiState, api_routes};
use vendbot::scenes::WorkflowId;
use vendbot::scenes::WorkflowData;
use vendbot::scenes::bag_assembly::BagData;
use vendbot::store::model::{NewTask, Role, TaskType};
use vendbot::store::{LibSqlRepository, Repository};
use vendbot::workflow::{SessionStore, StateName};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Start an Axum server on a random port, return (port, repo, sessions).
async fn start_server() -> (u16, Arc<LibSqlRepository>, Arc<SessionStore>) {
    let repo = Arc::new(LibSqlRepository::new_memory().await.unwrap());
    let sessions = Arc::new(SessionStore::new());
    let app = api_routes(ApiState {
        sessions: Arc::clone(&sessions),
        repo: repo.clone(),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (port, repo, sessions)
}

#[tokio::test]
async fn health_reports_live_sessions() {
    timeout(TEST_TIMEOUT, async {
        let (port, _, sessions) = start_server().await;
        sessions.get("7").await;

        let resp = reqwest::get(format!("http://127.0.0.1:{port}/api/health"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "vendbot");
        assert_eq!(body["sessions"], 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn machines_are_listed() {
    timeout(TEST_TIMEOUT, async {
        let (port, repo, _) = start_server().await;
        repo.add_machine("VM-014", "Airport", Some("Gate 3"))
            .await
            .unwrap();
        repo.add_machine("VM-015", "Library", None).await.unwrap();

        let resp = reqwest::get(format!("http://127.0.0.1:{port}/api/machines"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let body: Vec<Value> = resp.json().await.unwrap();
        assert_eq!(body.len(), 2);
        assert!(body.iter().any(|m| m["code"] == "VM-014" && m["location"] == "Gate 3"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn task_lookup() {
    timeout(TEST_TIMEOUT, async {
        let (port, repo, _) = start_server().await;
        let machine = repo.add_machine("VM-014", "Airport", None).await.unwrap();
        let manager = repo
            .upsert_user("100", "Mia", &[Role::Manager])
            .await
            .unwrap();
        let task = repo
            .create_task(NewTask {
                task_type: TaskType::Repair,
                machine_id: machine.id,
                items: Vec::new(),
                deadline: None,
                checklist_template_id: None,
                executor_id: None,
                creator_id: manager.id,
                description: Some("Coin slot jammed".into()),
            })
            .await
            .unwrap();

        let resp = reqwest::get(format!("http://127.0.0.1:{port}/api/tasks/{}", task.id))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["id"], task.id);
        assert_eq!(body["machine_id"], machine.id);
        assert_eq!(body["description"], "Coin slot jammed");

        let resp = reqwest::get(format!("http://127.0.0.1:{port}/api/tasks/{}", task.id + 100))
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn session_snapshot_follows_the_store() {
    timeout(TEST_TIMEOUT, async {
        let (port, _, sessions) = start_server().await;
        let url = format!("http://127.0.0.1:{port}/api/sessions/200");

        let body: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert!(body["workflow"].is_null());

        sessions.get("200").await.lock().await.enter(
            WorkflowId::BagAssembly,
            StateName::new("syrups"),
            WorkflowData::BagAssembly(BagData::default()),
        );

        let body: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(body["user_id"], "200");
        assert_eq!(body["workflow"], "bag_assembly");
        assert_eq!(body["state"], "syrups");
    })
    .await
    .expect("test timed out");
}
