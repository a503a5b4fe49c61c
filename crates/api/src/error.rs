use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use runlatch_core::error::{CoreError, ProcessError, QueueError};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Implements [`IntoResponse`] to produce `{ "error", "code" }` JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Path validation and queue construction failures.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A run failed at one of its stages.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// A state operation outside a run failed.
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => match core {
                CoreError::InvalidPath(msg) => (StatusCode::BAD_REQUEST, "INVALID_PATH", msg.clone()),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::NotInitialized => internal(core),
            },

            AppError::Process(err) => match classify_queue_error(&err.source) {
                Some((status, code)) => (status, code, err.to_string()),
                None => internal(err),
            },

            AppError::Queue(err) => match classify_queue_error(err) {
                Some((status, code)) => (status, code, err.to_string()),
                None => internal(err),
            },

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Status and code for queue errors a client can act on; `None` for
/// internal failures.
fn classify_queue_error(err: &QueueError) -> Option<(StatusCode, &'static str)> {
    match err {
        QueueError::AlreadyRunning => Some((StatusCode::CONFLICT, "ALREADY_RUNNING")),
        QueueError::QueueDisabled => Some((StatusCode::LOCKED, "QUEUE_DISABLED")),
        QueueError::StateMissing
        | QueueError::NotRunning
        | QueueError::OwnershipLost { .. }
        | QueueError::MissingForceRunTarget => Some((StatusCode::CONFLICT, "LOCK_LOST")),
        QueueError::Store(store) if store.is_conflict() => Some((StatusCode::CONFLICT, "CONFLICT")),
        QueueError::Store(_) | QueueError::Worker(_) => None,
    }
}

fn internal(err: &dyn std::error::Error) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %err, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}
