//! Application error type mapping to HTTP status codes and envelope format.

use axum::response::{IntoResponse, Response};

use engram_types::error::{MemoryError, RepositoryError};

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Memory(MemoryError),
    Validation(String),
}

impl From<MemoryError> for AppError {
    fn from(e: MemoryError) -> Self {
        AppError::Memory(e)
    }
}

impl AppError {
    /// Envelope error code and message.
    fn code_and_message(&self) -> (&'static str, String) {
        match self {
            AppError::Memory(MemoryError::InvalidRequest(msg)) => ("VALIDATION_ERROR", msg.clone()),
            AppError::Memory(MemoryError::Repository(RepositoryError::NotFound)) => {
                ("NOT_FOUND", "Not found".to_string())
            }
            AppError::Memory(MemoryError::Repository(RepositoryError::Conflict(msg))) => {
                ("CONFLICT", msg.clone())
            }
            AppError::Memory(MemoryError::Repository(RepositoryError::Connection)) => {
                ("STORAGE_UNAVAILABLE", "Memory storage is unavailable".to_string())
            }
            AppError::Memory(e) => ("MEMORY_ERROR", e.to_string()),
            AppError::Validation(msg) => ("VALIDATION_ERROR", msg.clone()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (code, message) = self.code_and_message();
        if code == "MEMORY_ERROR" {
            tracing::error!(%message, "request failed");
        }
        ApiResponse::error(code, &message, None).into_response()
    }
}
