use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Errors surfaced by the user service and its HTTP handlers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The hasher failed; the record was not written.
    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("password hashing timed out")]
    HashTimeout,

    #[error("storage error: {0}")]
    Storage(String),

    /// Storage did not answer in time; safe to retry.
    #[error("storage timed out")]
    StorageTimeout,

    /// The record changed between load and write.
    #[error("User was modified concurrently; retry")]
    StaleWrite,
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) | Self::StaleWrite => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Hash(_) | Self::HashTimeout | Self::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::StorageTimeout => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageTimeout | Self::StaleWrite)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        // internal details stay in the logs
        let message = if status.is_server_error() {
            error!(error = %self, "request failed");
            match self {
                Self::StorageTimeout => "Service temporarily unavailable".to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            self.to_string()
        };

        let mut res = (status, Json(json!({ "error": message }))).into_response();
        if self.is_retryable() {
            res.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        res
    }
}
