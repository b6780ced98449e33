use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use srs_sessions::SessionError;

/// Application-level error type for HTTP handlers.
///
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Session(#[from] SessionError),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Session(SessionError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Session(SessionError::Expired(_)) => (StatusCode::UNAUTHORIZED, "SESSION_EXPIRED"),
            AppError::Session(SessionError::InvalidUser) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        };

        let body = json!({
            "error": self.to_string(),
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
