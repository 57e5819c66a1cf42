//! Read-only REST endpoints over the fleet data and live sessions.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::error::DatabaseError;
use crate::store::model::EntityId;
use crate::store::traits::Repository;
use crate::workflow::session::{SessionSnapshot, SessionStore};

/// Shared state for the API routes.
#[derive(Clone)]
pub struct ApiState {
    pub sessions: Arc<SessionStore>,
    pub repo: Arc<dyn Repository>,
}

/// Build the API router.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/sessions/{user_id}", get(get_session))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/machines", get(list_machines))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "vendbot",
        "sessions": state.sessions.len().await,
    }))
}

// ── Sessions ────────────────────────────────────────────────────────────

/// GET /api/sessions/{user_id}
///
/// Users that never spoke are reported idle rather than missing.
async fn get_session(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> Json<SessionSnapshot> {
    let snapshot = state
        .sessions
        .snapshot(&user_id)
        .await
        .unwrap_or(SessionSnapshot {
            user_id,
            workflow: None,
            state: None,
            return_to: None,
        });
    Json(snapshot)
}

// ── Fleet data ──────────────────────────────────────────────────────────

/// GET /api/tasks/{id}
async fn get_task(State(state): State<ApiState>, Path(id): Path<EntityId>) -> Response {
    match state.repo.get_task(id).await {
        Ok(Some(task)) => Json(task).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("Task {id} not found")})),
        )
            .into_response(),
        Err(e) => repository_failure("get_task", e),
    }
}

/// GET /api/machines
async fn list_machines(State(state): State<ApiState>) -> Response {
    match state.repo.list_machines().await {
        Ok(machines) => Json(machines).into_response(),
        Err(e) => repository_failure("list_machines", e),
    }
}

fn repository_failure(op: &str, e: DatabaseError) -> Response {
    warn!(op, "API repository call failed: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"error": "Repository unavailable"})),
    )
        .into_response()
}
