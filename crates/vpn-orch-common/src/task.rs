//! Task processing status and result types.

use thiserror::Error;

/// Outcome of processing a single change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Event applied
    Success,
    /// Rejected: malformed input or unsupported operation
    InvalidEntry,
    /// Rejected: conflicts with existing state
    Conflict,
    /// Dropped: the per-VPN lock could not be acquired in time
    LockTimeout,
    /// Downstream mutation failed
    Failed,
    /// Recorded for later, waiting for a dependency to materialize
    WaitingForDependency,
    /// Nothing to do
    Ignore,
}

impl TaskStatus {
    /// Returns true if the event needs no further attention.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Ignore | TaskStatus::WaitingForDependency
        )
    }

    /// Returns true if a later event may converge the model.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskStatus::LockTimeout | TaskStatus::Failed)
    }

    /// Returns true if the event was rejected permanently.
    pub fn is_rejection(&self) -> bool {
        matches!(self, TaskStatus::InvalidEntry | TaskStatus::Conflict)
    }
}

/// Error type for event processing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("Invalid entry: {message}")]
    InvalidEntry { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Timed out acquiring lock for {key}")]
    LockTimeout { key: String },

    #[error("Waiting for dependency: {dependency}")]
    WaitingForDependency { dependency: String },

    #[error("Downstream failure: {message}")]
    Downstream { message: String },

    #[error("Ignored: {reason}")]
    Ignored { reason: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TaskError {
    pub fn invalid_entry(message: impl Into<String>) -> Self {
        TaskError::InvalidEntry {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        TaskError::Conflict {
            message: message.into(),
        }
    }

    pub fn lock_timeout(key: impl Into<String>) -> Self {
        TaskError::LockTimeout { key: key.into() }
    }

    pub fn waiting_for(dependency: impl Into<String>) -> Self {
        TaskError::WaitingForDependency {
            dependency: dependency.into(),
        }
    }

    pub fn downstream(message: impl Into<String>) -> Self {
        TaskError::Downstream {
            message: message.into(),
        }
    }

    pub fn ignored(reason: impl Into<String>) -> Self {
        TaskError::Ignored {
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        TaskError::Internal {
            message: message.into(),
        }
    }

    /// Converts this error to a TaskStatus.
    pub fn to_status(&self) -> TaskStatus {
        match self {
            TaskError::InvalidEntry { .. } => TaskStatus::InvalidEntry,
            TaskError::Conflict { .. } => TaskStatus::Conflict,
            TaskError::LockTimeout { .. } => TaskStatus::LockTimeout,
            TaskError::WaitingForDependency { .. } => TaskStatus::WaitingForDependency,
            TaskError::Downstream { .. } => TaskStatus::Failed,
            TaskError::Ignored { .. } => TaskStatus::Ignore,
            TaskError::Internal { .. } => TaskStatus::Failed,
        }
    }
}

/// Result type for event processing.
pub type TaskResult<T> = Result<T, TaskError>;

/// Extension trait for converting TaskResult to TaskStatus.
pub trait TaskResultExt {
    fn to_status(&self) -> TaskStatus;
}

impl<T> TaskResultExt for TaskResult<T> {
    fn to_status(&self) -> TaskStatus {
        match self {
            Ok(_) => TaskStatus::Success,
            Err(e) => e.to_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status_classification() {
        assert!(TaskStatus::Success.is_success());
        assert!(TaskStatus::WaitingForDependency.is_success());
        assert!(!TaskStatus::Failed.is_success());

        assert!(TaskStatus::LockTimeout.is_retryable());
        assert!(!TaskStatus::Conflict.is_retryable());

        assert!(TaskStatus::InvalidEntry.is_rejection());
        assert!(TaskStatus::Conflict.is_rejection());
        assert!(!TaskStatus::LockTimeout.is_rejection());
    }

    #[test]
    fn test_task_error_to_status() {
        assert_eq!(
            TaskError::invalid_entry("rd contains whitespace").to_status(),
            TaskStatus::InvalidEntry
        );
        assert_eq!(
            TaskError::conflict("router already associated").to_status(),
            TaskStatus::Conflict
        );
        assert_eq!(TaskError::lock_timeout("vpn-1").to_status(), TaskStatus::LockTimeout);
        assert_eq!(TaskError::downstream("boom").to_status(), TaskStatus::Failed);
    }

    #[test]
    fn test_task_result_ext() {
        let ok: TaskResult<()> = Ok(());
        assert_eq!(ok.to_status(), TaskStatus::Success);

        let err: TaskResult<()> = Err(TaskError::waiting_for("vpn-1"));
        assert_eq!(err.to_status(), TaskStatus::WaitingForDependency);
    }
}
