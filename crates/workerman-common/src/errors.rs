//! Error types for the workerman supervisor.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::WorkerId;

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for supervisor operations.
///
/// The variants map to the failure domains of the system: command
/// preconditions, process creation, socket setup, rendezvous file I/O,
/// signal delivery, and planned-exit verification.
#[derive(Debug, Error)]
pub enum Error {
    /// A command precondition was violated ("already running",
    /// "not running", stale rendezvous state).
    #[error("{message}")]
    Lifecycle { message: String },

    /// A `fork` failed. Fatal in both master and controller contexts.
    #[error("fork failed during {stage}: {reason}")]
    Fork { stage: String, reason: String },

    /// Listener setup failed (address in use, permission, bad address).
    #[error("failed to bind {address}: {reason}")]
    Bind { address: String, reason: String },

    /// A rendezvous read/write/unlink/lock failed.
    #[error("file operation failed on {path}: {reason}")]
    FileIo { path: PathBuf, reason: String },

    /// `kill(pid, sig)` returned failure during a fanout.
    #[error("failed to deliver signal {signal} to pid {pid}: {reason}")]
    SignalDelivery {
        pid: i32,
        signal: String,
        reason: String,
    },

    /// A worker exited with non-zero status during a planned stop or reload.
    #[error("worker {worker_id} exited unexpectedly with status {status}")]
    UnexpectedExit { worker_id: WorkerId, status: i32 },

    /// I/O error outside the rendezvous directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context.
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        source: Box<Error>,
    },
}

impl Error {
    /// Creates a Lifecycle error.
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle {
            message: message.into(),
        }
    }

    /// Creates a Fork error.
    pub fn fork(stage: impl Into<String>, reason: impl ToString) -> Self {
        Self::Fork {
            stage: stage.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a Bind error.
    pub fn bind(address: impl ToString, reason: impl ToString) -> Self {
        Self::Bind {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Creates a FileIo error.
    pub fn file_io(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::FileIo {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a SignalDelivery error.
    pub fn signal_delivery(pid: i32, signal: impl Into<String>, reason: impl ToString) -> Self {
        Self::SignalDelivery {
            pid,
            signal: signal.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates an UnexpectedExit error.
    pub fn unexpected_exit(worker_id: WorkerId, status: i32) -> Self {
        Self::UnexpectedExit { worker_id, status }
    }

    /// Adds context to an error.
    pub fn context(self, message: impl Into<String>) -> Self {
        Self::WithContext {
            message: message.into(),
            source: Box::new(self),
        }
    }

    /// True for precondition violations the CLI reports as a short
    /// operator message instead of an error chain.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Lifecycle { .. })
    }
}

/// Convenience methods for Result types.
pub trait ResultExt<T> {
    /// Adds context to an error result.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_message_is_verbatim() {
        let err = Error::lifecycle("Cannot start workerman, workerman already running.");
        assert_eq!(
            err.to_string(),
            "Cannot start workerman, workerman already running."
        );
        assert!(err.is_lifecycle());
    }

    #[test]
    fn test_error_context() {
        let err = Error::bind("127.0.0.1:80", "permission denied").context("listener setup");
        let message = err.to_string();
        assert!(message.contains("listener setup"));
        assert!(!err.is_lifecycle());
    }

    #[test]
    fn test_unexpected_exit_display() {
        let err = Error::unexpected_exit(WorkerId::new(3), 9);
        assert_eq!(err.to_string(), "worker 3 exited unexpectedly with status 9");
    }
}
