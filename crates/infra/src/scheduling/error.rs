//! Scheduler error types

use relay_domain::RelayError;
use thiserror::Error;

use crate::errors::InfraError;

/// Scheduler-specific errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Scheduler is already running
    #[error("Scheduler already running")]
    AlreadyRunning,

    /// Scheduler is not running
    #[error("Scheduler not running")]
    NotRunning,

    /// Failed to create scheduler
    #[error("Failed to create scheduler: {0}")]
    CreationFailed(String),

    /// Failed to start scheduler
    #[error("Failed to start scheduler: {0}")]
    StartFailed(String),

    /// Failed to stop scheduler
    #[error("Failed to stop scheduler: {0}")]
    StopFailed(String),

    /// Failed to register job
    #[error("Failed to register job: {0}")]
    JobRegistrationFailed(String),

    /// Failed to load workflow definitions
    #[error("Failed to load workflows: {0}")]
    WorkflowLoadFailed(String),

    /// Operation timed out
    #[error("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Task join failed
    #[error("Task join failed: {0}")]
    TaskJoinFailed(String),
}

/// Result type alias for scheduler operations
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

impl From<SchedulerError> for InfraError {
    fn from(err: SchedulerError) -> Self {
        let relay_err = match err {
            SchedulerError::AlreadyRunning | SchedulerError::NotRunning => {
                RelayError::InvalidInput(err.to_string())
            }
            _ => RelayError::Internal(err.to_string()),
        };
        InfraError(relay_err)
    }
}

impl From<SchedulerError> for RelayError {
    fn from(err: SchedulerError) -> Self {
        InfraError::from(err).into()
    }
}
