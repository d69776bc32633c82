//! Error taxonomy shared by the stores, the feedback gateway and the HTTP layer.
//!
//! Handlers return `LaraError` directly; `IntoResponse` maps each kind to a
//! status code and a small JSON body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LaraError>;

/// Shown to a student when feedback could not be generated.
pub const GENERATION_RETRY_MESSAGE: &str = "Sorry, we could not generate feedback at this time. \
Please check your internet connection and try again. \
If the problem persists, contact your teacher.";

#[derive(Debug, Error)]
pub enum LaraError {
    /// The remote service is not configured (e.g. no API key). Not recoverable at runtime.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network failure, non-JSON reply or schema mismatch from the model.
    #[error("feedback generation failed: {0}")]
    Generation(String),

    /// Uniform on purpose: unknown email and wrong password look the same.
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("invalid input for '{field}': {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("student {0} not found")]
    StudentNotFound(String),

    #[error("no submission for student {0}")]
    SubmissionNotFound(String),

    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("no teacher is logged in")]
    NotLoggedIn,

    #[error("storage error for key '{key}': {message}")]
    Storage { key: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LaraError {
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn storage(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Storage {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Short machine-readable kind, used in HTTP bodies and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Generation(_) => "generation",
            Self::InvalidCredentials => "invalid_credentials",
            Self::InvalidInput { .. } => "invalid_input",
            Self::StudentNotFound(_) => "student_not_found",
            Self::SubmissionNotFound(_) => "submission_not_found",
            Self::TaskNotFound(_) => "task_not_found",
            Self::NotLoggedIn => "not_logged_in",
            Self::Storage { .. } => "storage",
            Self::Serialization(_) => "serialization",
        }
    }

    /// Message safe to show to an end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Generation(_) => GENERATION_RETRY_MESSAGE.to_string(),
            Self::Storage { .. } | Self::Serialization(_) => "Internal storage error.".to_string(),
            other => other.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Generation(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidCredentials | Self::NotLoggedIn => StatusCode::UNAUTHORIZED,
            Self::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            Self::StudentNotFound(_) | Self::SubmissionNotFound(_) | Self::TaskNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::Storage { .. } | Self::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for LaraError {
    fn into_response(self) -> Response {
        if self.status_code().is_server_error() {
            tracing::error!(target: "lara_backend", kind = self.kind(), error = %self, "request failed");
        }
        let body = ErrorBody {
            error: self.kind(),
            message: self.user_message(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_errors_do_not_reveal_which_field_was_wrong() {
        let msg = LaraError::InvalidCredentials.user_message();
        assert_eq!(msg, "Invalid email or password");
    }

    #[test]
    fn generation_failures_map_to_retry_prompt() {
        let err = LaraError::Generation("HTTP 500".into());
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.user_message(), GENERATION_RETRY_MESSAGE);
        assert_eq!(err.kind(), "generation");
    }

    #[test]
    fn missing_records_are_not_found() {
        assert_eq!(
            LaraError::StudentNotFound("s1".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            LaraError::Configuration("no key".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
