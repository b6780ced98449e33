use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Scheduler counters.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Workers and web consoles counted against the cap.
    pub registered_workers: usize,
    pub max_workers: usize,
    pub can_create_worker: bool,
    /// Executions still followed by a poller.
    pub live_executions: usize,
    pub sessions: usize,
}

/// GET /api/v1/status
async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let stats = state.orchestrator.stats();
    Json(StatusResponse {
        registered_workers: stats.registered_count().await,
        max_workers: stats.policy().await.max_workers,
        can_create_worker: state.orchestrator.can_create_new_worker().await,
        live_executions: state.mediator.live_count().await,
        sessions: state.sessions.len().await,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/status", get(status))
}
