use thiserror::Error;

/// All catalog-layer errors. Kept separate from the scheduler's errors so the
/// gateway can map them to HTTP statuses without coupling layers.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Request payload is missing a required field or references something
    /// that cannot be resolved.
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// The task has been cancelled and is no longer mutable.
    #[error("Task '{0}' is cancelled")]
    Cancelled(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl CatalogError {
    /// Short error code string sent to clients in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            CatalogError::NotFound(_) => "NOT_FOUND",
            CatalogError::AlreadyExists(_) => "CONFLICT",
            CatalogError::Invalid(_) => "VALIDATION_ERROR",
            CatalogError::Cancelled(_) => "INVALID_STATE",
            CatalogError::Database(_) => "DATABASE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// True when `e` is a UNIQUE / PRIMARY KEY violation.
pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
