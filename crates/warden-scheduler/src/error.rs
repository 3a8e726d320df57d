use thiserror::Error;
use warden_catalog::CatalogError;

/// Errors raised by a live scheduler backend.
#[derive(Debug, Error)]
pub enum LiveError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The stored entry exists but is not in the expected layout.
    #[error("Malformed live entry '{key}': {reason}")]
    Malformed { key: String, reason: String },

    /// The live scheduler refused the entry (e.g. an unsatisfiable recurrence).
    #[error("Live scheduler rejected entry '{name}': {reason}")]
    Rejected { name: String, reason: String },

    #[error("Live scheduler unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by an execution backend during ad-hoc dispatch or revoke.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Execution backend unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that can occur within the scheduling subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Malformed or unsupported request input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A parameter the task declares has no value in the request.
    #[error("Missing value for parameter: {name}")]
    MissingParameter { name: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The translated recurrence cannot fire.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The live scheduler call failed and no durable change was applied.
    #[error("Live scheduler error: {0}")]
    Adapter(#[from] LiveError),

    /// The durable cancellation was committed but the live entry could not be removed.
    #[error("Schedule '{live_name}' cancelled in store, but removing the live entry failed: {source}")]
    LiveCleanupFailed { live_name: String, source: LiveError },

    #[error("Execution error: {0}")]
    Execution(#[from] ExecError),

    /// The request was flagged cancelled but the backend could not revoke it.
    #[error("Request '{request_id}' cancelled in store, but revoking it failed: {source}")]
    RevokeFailed { request_id: String, source: ExecError },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl SchedulerError {
    /// Short error code string sent to clients in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Validation(_) => "VALIDATION_ERROR",
            SchedulerError::MissingParameter { .. } => "MISSING_PARAMETER",
            SchedulerError::NotFound(_) => "NOT_FOUND",
            SchedulerError::InvalidState(_) => "INVALID_STATE",
            SchedulerError::Conflict(_) => "CONFLICT",
            SchedulerError::InvalidSchedule(_) => "INVALID_SCHEDULE",
            SchedulerError::Adapter(_) => "ADAPTER_ERROR",
            SchedulerError::LiveCleanupFailed { .. } => "LIVE_CLEANUP_FAILED",
            SchedulerError::Execution(_) => "EXECUTION_ERROR",
            SchedulerError::RevokeFailed { .. } => "REVOKE_FAILED",
            SchedulerError::Database(_) => "DATABASE_ERROR",
            SchedulerError::Catalog(e) => e.code(),
        }
    }

    /// True when a durable change was committed even though the call failed.
    pub fn durable_change_applied(&self) -> bool {
        matches!(
            self,
            SchedulerError::LiveCleanupFailed { .. } | SchedulerError::RevokeFailed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_codes_pass_through() {
        let err = SchedulerError::from(CatalogError::NotFound("task 't1'".into()));
        assert_eq!(err.code(), "NOT_FOUND");
        assert!(!err.durable_change_applied());
    }

    #[test]
    fn partial_failures_flag_durable_change() {
        let err = SchedulerError::LiveCleanupFailed {
            live_name: "nightly_x".into(),
            source: LiveError::Unavailable("down".into()),
        };
        assert_eq!(err.code(), "LIVE_CLEANUP_FAILED");
        assert!(err.durable_change_applied());
        assert!(err.to_string().contains("nightly_x"));
    }
}
