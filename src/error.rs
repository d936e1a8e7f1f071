use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::driver::portal::DriverError;
use crate::models::job::{FailureKind, JobFailure};

/// The application's error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// A missing or malformed request field.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A date that is malformed, impossible, or in the future.
    #[error("Invalid date: {0}")]
    DateFormat(String),

    /// A start date after the end date.
    #[error("Invalid date range: {0}")]
    Range(String),

    /// The portal rejected the username/password.
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// No stored session and no password supplied.
    #[error("User not authenticated")]
    NotAuthenticated,

    /// A resource not found error.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The portal driver failed; fatal for the current job.
    #[error("Portal driver error: {0}")]
    Driver(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// The HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::DateFormat(_) | AppError::Range(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::InvalidCredentials | AppError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Driver(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// A stable machine-readable name, paired with the status in every error body.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::DateFormat(_) => "date_format_error",
            AppError::Range(_) => "range_error",
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::NotAuthenticated => "not_authenticated",
            AppError::NotFound(_) => "not_found",
            AppError::Driver(_) => "driver_failure",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// The message shown to clients. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<DriverError> for AppError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::InvalidCredentials => AppError::InvalidCredentials,
            DriverError::UnknownHandle => AppError::NotAuthenticated,
            other => AppError::Driver(other.to_string()),
        }
    }
}

impl From<JobFailure> for AppError {
    fn from(failure: JobFailure) -> Self {
        match failure.kind {
            FailureKind::InvalidCredentials => AppError::InvalidCredentials,
            FailureKind::DriverFailure => AppError::Driver(failure.message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Driver(ref msg) => tracing::error!("Portal driver error: {}", msg),
            AppError::Internal(ref msg) => tracing::error!("Internal error: {}", msg),
            AppError::InvalidCredentials | AppError::NotAuthenticated => {
                tracing::warn!("Authentication failed: {}", self)
            }
            ref other => tracing::debug!("Request rejected: {}", other),
        }

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": self.public_message(),
            "kind": self.kind(),
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error","kind":"internal_error"}"#.to_string());

        (
            self.status(),
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    }
}
