//! Error types for stackhold

use thiserror::Error;

/// Result type alias for stackhold operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during backup, restore, and update runs
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Repository unreachable: {0}")]
    RepositoryUnreachable(String),

    #[error("Snapshot failed: {0}")]
    SnapshotFailed(String),

    #[error("Restore failed: {0}")]
    RestoreFailed(String),

    #[error("No snapshot matches '{0}'")]
    SnapshotNotFound(String),

    #[error("Service '{0}' is unhealthy")]
    ServiceUnhealthy(String),

    #[error("Command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Permission denied: must run as root")]
    PermissionDenied,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
