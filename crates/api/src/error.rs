use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dumpsync_core::error::SyncError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`SyncError`] for pipeline errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// An error from the import pipeline.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Sync(err) => classify_sync_error(err),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Classify a pipeline error into an HTTP status, error code, and message.
///
/// - `AlreadyRunning` maps to 409.
/// - `ServiceDisabled` maps to 503.
/// - Everything else maps to 500; configuration errors keep their message.
fn classify_sync_error(err: &SyncError) -> (StatusCode, &'static str, String) {
    match err {
        SyncError::AlreadyRunning => (StatusCode::CONFLICT, "ALREADY_RUNNING", err.to_string()),
        SyncError::ServiceDisabled => (
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_DISABLED",
            err.to_string(),
        ),
        SyncError::Configuration(_) => {
            tracing::error!(error = %err, "Import configuration error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIGURATION_ERROR",
                err.to_string(),
            )
        }
        other => {
            tracing::error!(error = %other, "Import error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_errors_map_to_statuses() {
        let cases = [
            (SyncError::AlreadyRunning, StatusCode::CONFLICT),
            (SyncError::ServiceDisabled, StatusCode::SERVICE_UNAVAILABLE),
            (
                SyncError::Configuration("bad".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                SyncError::Connection("refused".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(AppError::from(err).into_response().status(), expected);
        }
    }

    #[test]
    fn bad_request_is_400() {
        let response = AppError::BadRequest("limit must be > 0".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
