use thiserror::Error;

/// Process-level failures: startup, configuration and the API guard.
/// Subsystem errors live in their own crates.
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WardenError {
    /// Short error code string sent to clients in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            WardenError::Config(_) => "CONFIG_ERROR",
            WardenError::AuthFailed(_) => "AUTH_FAILED",
            WardenError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
