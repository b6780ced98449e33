use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{routing::post, Router};
use srs_sessions::SessionError;

use crate::error::AppResult;
use crate::state::AppState;

/// POST /api/v1/sessions/{session_id}/activity
///
/// Slides the session's validity forward and resets the idle clock of
/// every worker the session created.
async fn record_activity(State(state): State<AppState>, Path(session_id): Path<String>) -> AppResult<StatusCode> {
    let session = state
        .sessions
        .get(&session_id)
        .await
        .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;

    state.sessions.validate_and_refresh(&session).await?;
    state.orchestrator.record_session_activity(&session_id).await;

    tracing::debug!(session_id = %session_id, "Session activity recorded");
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/sessions/{session_id}/activity", post(record_activity))
}
