// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    AuthError(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict (e.g., attempt already finalized)
    Conflict(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::AuthError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };
        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

/// Errors raised by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A persisted row could not be mapped back into a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

/// Outcomes of attempt lifecycle operations other than success.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("Attempt not found")]
    NotFound,

    #[error("Quiz not found")]
    QuizNotFound,

    /// The attempt was already submitted, by this caller or by the deadline.
    #[error("Attempt already finalized")]
    AlreadyFinalized,

    #[error("Not allowed to access this resource")]
    Forbidden,

    /// The quiz behind the attempt no longer exists. The attempt stays in progress.
    #[error("Attempt references a quiz that no longer exists")]
    DanglingReference,

    #[error("Quiz is not open for new attempts")]
    QuizNotOpen,

    /// Lost every compare-and-swap round to concurrent answer writes.
    #[error("Attempt is being modified concurrently, retry")]
    Contended,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<AttemptError> for AppError {
    fn from(err: AttemptError) -> Self {
        match err {
            AttemptError::NotFound | AttemptError::QuizNotFound => {
                AppError::NotFound(err.to_string())
            }
            AttemptError::Forbidden => AppError::Forbidden(err.to_string()),
            AttemptError::AlreadyFinalized
            | AttemptError::DanglingReference
            | AttemptError::QuizNotOpen
            | AttemptError::Contended => AppError::Conflict(err.to_string()),
            AttemptError::Store(e) => e.into(),
        }
    }
}

/// Failures surfaced by the deadline scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A fired job's callback failed. The job is marked failed and not retried.
    #[error("delivery of job {job_id} failed: {reason}")]
    DeliveryFailure { job_id: uuid::Uuid, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
