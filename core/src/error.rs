use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes shared across stage boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Transport,
    ProviderRefused,
    SchemaInvalid,
    ValidationRejected,
    IntegrityViolation,
    Cancelled,
    NotFound,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Transport => "TRANSPORT",
            ErrorCode::ProviderRefused => "PROVIDER_REFUSED",
            ErrorCode::SchemaInvalid => "SCHEMA_INVALID",
            ErrorCode::ValidationRejected => "VALIDATION_REJECTED",
            ErrorCode::IntegrityViolation => "INTEGRITY_VIOLATION",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error kinds crossing stage boundaries. Transport errors are the only
/// retriable class; everything else propagates to the orchestrator.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Network failure, timeout, HTTP 429 or 5xx.
    #[error("transport error: {0}")]
    Transport(String),
    /// Authentication, quota or policy refusal. Fatal for the call.
    #[error("provider refused: {0}")]
    ProviderRefused(String),
    /// Model returned non-conforming output.
    #[error("schema invalid: {0}")]
    SchemaInvalid(String),
    /// A post-condition check failed. Aborts the batch.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
    /// Cooperative cancellation.
    #[error("cancelled")]
    Cancelled,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::Transport(_) => ErrorCode::Transport,
            CoreError::ProviderRefused(_) => ErrorCode::ProviderRefused,
            CoreError::SchemaInvalid(_) => ErrorCode::SchemaInvalid,
            CoreError::IntegrityViolation(_) => ErrorCode::IntegrityViolation,
            CoreError::Cancelled => ErrorCode::Cancelled,
            CoreError::NotFound(_) => ErrorCode::NotFound,
            CoreError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, CoreError::Transport(_))
    }
}

/// Implemented by error types that can be classified for the retry loop.
pub trait Retriable {
    fn is_retriable(&self) -> bool;
}

impl Retriable for CoreError {
    fn is_retriable(&self) -> bool {
        CoreError::is_retriable(self)
    }
}
