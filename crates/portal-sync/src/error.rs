//! Error types for the storage replication queue.

use thiserror::Error;

/// Errors raised by the transfer executor for a single attempt.
///
/// These never reach the caller that enqueued a task; the queue converts
/// them into task state (retry or permanent failure).
#[derive(Debug, Error)]
pub enum TransferError {
    /// The external command could not be started.
    #[error("{program} error: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The external command ran but did not exit successfully.
    #[error("{program} failed (exit {}): {output}", .code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    ExitStatus {
        /// Program that failed.
        program: String,
        /// Exit code, `None` when terminated by a signal.
        code: Option<i32>,
        /// Captured stderr, or stdout when stderr was empty.
        output: String,
    },

    /// The attempt exceeded its wall-clock bound and was killed.
    #[error("{program} timed out after {secs}s")]
    Timeout {
        /// Program that timed out.
        program: String,
        /// Bound that was exceeded.
        secs: u64,
    },

    /// The object name cannot be mapped safely under the base paths.
    #[error("invalid object name: {name:?}")]
    InvalidObjectName {
        /// Offending object name.
        name: String,
    },
}

/// Errors that can occur in the sync subsystem.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration is missing or inconsistent.
    #[error("configuration error: {msg}")]
    Config {
        /// Error message describing the issue.
        msg: String,
    },

    /// File sync is switched off.
    #[error("File sync is not enabled")]
    Disabled,

    /// No failed task with this id is present in history.
    #[error("Task not found or not in failed state")]
    TaskNotFound {
        /// The requested task identifier.
        task_id: String,
    },

    /// The queue worker has stopped.
    #[error("sync queue shut down")]
    Shutdown,

    /// I/O error.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// TOML config parse error.
    #[error("invalid TOML config")]
    Toml(#[from] toml::de::Error),

    /// JSON config parse error.
    #[error("invalid JSON config")]
    Json(#[from] serde_json::Error),
}

/// Result alias for the sync subsystem.
pub type Result<T> = std::result::Result<T, SyncError>;
