use crate::{services::error::StorageError, validation::NameError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::fmt;

/// Request-boundary error: an HTTP status, a stable machine-readable code and
/// a message safe to show the client.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    /// Underlying cause for the logs, when it differs from `message`.
    pub cause: Option<String>,
}

/// Copy of a failed request's error, left in the response extensions for the
/// request-logging middleware.
#[derive(Clone, Debug)]
pub struct ErrorReport {
    pub code: &'static str,
    pub message: String,
    pub cause: Option<String>,
}

impl ErrorReport {
    pub fn cause(&self) -> &str {
        self.cause.as_deref().unwrap_or(&self.message)
    }
}

impl AppError {
    /// Create a new AppError with a specific status, code and message.
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
            cause: None,
        }
    }

    /// Shortcut for a 500 Internal Server Error; the cause is logged, not sent.
    pub fn internal(cause: impl fmt::Display) -> Self {
        Self {
            cause: Some(cause.to_string()),
            ..Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalError",
                "internal storage error",
            )
        }
    }

    pub fn method_not_allowed() -> Self {
        Self::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "MethodNotAllowed",
            "the method is not allowed against this resource",
        )
    }

    pub fn no_such_resource() -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "NoSuchResource",
            "the specified resource doesn't exist",
        )
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code,
            message: self.message.clone(),
            cause: self.cause.clone(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

/// JSON body shared by every error response.
pub fn error_body(status: StatusCode, report: &ErrorReport, resource: &str) -> Json<Value> {
    Json(json!({
        "code": report.code,
        "message": report.message,
        "resource": resource,
        "status": status.as_u16()
    }))
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let report = self.report();
        // The logging middleware re-renders this body with the request path.
        let mut response = (self.status, error_body(self.status, &report, "")).into_response();
        response.extensions_mut().insert(report);
        response
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let message = err.to_string();
        match err {
            StorageError::BucketNotFound(_) => {
                AppError::new(StatusCode::NOT_FOUND, "NoSuchBucket", message)
            }
            StorageError::ObjectNotFound { .. } => {
                AppError::new(StatusCode::NOT_FOUND, "NoSuchKey", message)
            }
            StorageError::BucketAlreadyExists(_) => {
                AppError::new(StatusCode::CONFLICT, "BucketAlreadyExists", message)
            }
            StorageError::BucketNotEmpty(_) | StorageError::BucketDirectoryNotClean { .. } => {
                AppError::new(StatusCode::CONFLICT, "BucketNotEmpty", message)
            }
            StorageError::ProhibitedName(_) => {
                AppError::new(StatusCode::BAD_REQUEST, "InvalidName", message)
            }
            StorageError::UndefinedLength => {
                AppError::new(StatusCode::BAD_REQUEST, "UndefinedLength", message)
            }
            StorageError::BodyLengthMismatch { .. } => {
                AppError::new(StatusCode::BAD_REQUEST, "IncompleteBody", message)
            }
            StorageError::TooLarge { .. } => {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, "EntityTooLarge", message)
            }
            StorageError::ProhibitedStoragePath(_)
            | StorageError::Corruption { .. }
            | StorageError::CatalogMismatch { .. }
            | StorageError::LockTimeout(_)
            | StorageError::Csv(_)
            | StorageError::Io(_) => AppError::internal(message),
        }
    }
}

impl From<NameError> for AppError {
    fn from(err: NameError) -> Self {
        AppError::new(StatusCode::BAD_REQUEST, "InvalidName", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn storage_errors_map_to_statuses() {
        let cases = [
            (StorageError::BucketNotFound("a".into()), StatusCode::NOT_FOUND),
            (StorageError::BucketAlreadyExists("a".into()), StatusCode::CONFLICT),
            (StorageError::BucketNotEmpty("a".into()), StatusCode::CONFLICT),
            (StorageError::UndefinedLength, StatusCode::BAD_REQUEST),
            (
                StorageError::TooLarge { declared: 2, max: 1 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                StorageError::Io(io::Error::other("disk on fire")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn internal_errors_hide_their_cause() {
        let err = AppError::from(StorageError::Io(io::Error::other("disk on fire")));
        assert_eq!(err.code, "InternalError");
        assert!(!err.message.contains("disk on fire"));
        assert_eq!(err.report().cause(), "disk on fire");
    }

    #[test]
    fn response_carries_report() {
        let response = AppError::no_such_resource().into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let report = response.extensions().get::<ErrorReport>().unwrap();
        assert_eq!(report.code, "NoSuchResource");
    }
}
