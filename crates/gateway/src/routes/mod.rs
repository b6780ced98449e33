pub mod health;
pub mod sessions;
pub mod status;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /status                                          scheduler counters
/// /sessions/{session_id}/activity                  session keep-alive (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().merge(status::router()).merge(sessions::router())
}
