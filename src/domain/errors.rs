//! Domain errors for the taskroom coordination core.

use thiserror::Error;
use uuid::Uuid;

/// Failure class of a task-store operation. Callers use the kind to decide
/// whether a retry is worthwhile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The addressed row does not exist.
    NotFound,
    /// A uniqueness or state constraint was violated.
    Conflict,
    /// Momentary failure (lock contention, pool exhaustion). Retryable.
    Transient,
    /// Unrecoverable failure. Not retryable.
    Fatal,
}

/// Error returned by every [`TaskStore`](crate::domain::ports::TaskStore)
/// operation.
#[derive(Debug, Error)]
#[error("store error ({kind:?}): {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self { kind: StoreErrorKind::NotFound, message: message.into() }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self { kind: StoreErrorKind::Conflict, message: message.into() }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self { kind: StoreErrorKind::Transient, message: message.into() }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self { kind: StoreErrorKind::Fatal, message: message.into() }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == StoreErrorKind::Transient
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == StoreErrorKind::NotFound
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::not_found(err.to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::transient(err.to_string())
            }
            sqlx::Error::Database(db) => {
                let message = db.message().to_lowercase();
                if message.contains("locked") || message.contains("busy") {
                    Self::transient(db.message().to_string())
                } else if message.contains("unique") || message.contains("constraint") {
                    Self::conflict(db.message().to_string())
                } else {
                    Self::fatal(db.message().to_string())
                }
            }
            _ => Self::fatal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::fatal(format!("serialization: {err}"))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the coordination services.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Blocker not found for task {task_id} and agent {agent}")]
    BlockNotFound { task_id: Uuid, agent: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Docs tool is not configured")]
    DocsUnavailable,

    #[error("Docs query failed: {0}")]
    DocsFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlx_row_not_found_maps_to_not_found() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(err.is_not_found());
        assert!(!err.is_transient());
    }

    #[test]
    fn pool_timeout_is_transient() {
        let err: StoreError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_transient());
    }
}
