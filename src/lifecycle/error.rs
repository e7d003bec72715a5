use crate::execution_store::{BatchStatus, ReadOnlyViolation};
use crate::schema_target::UnknownTarget;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("No {kind} with id {id} in schema target {target}")]
    NotFound {
        kind: &'static str,
        id: i64,
        target: String,
    },

    #[error("Execution {id} in schema target {target} is not running (status {status:?})")]
    ExecutionNotRunning {
        id: i64,
        target: String,
        status: BatchStatus,
    },

    #[error("Execution {id} in schema target {target} is running or complete (status {status:?})")]
    AlreadyRunning {
        id: i64,
        target: String,
        status: BatchStatus,
    },

    #[error("Execution {id} in schema target {target} cannot be restarted (status {status:?})")]
    NotRestartable {
        id: i64,
        target: String,
        status: BatchStatus,
    },

    #[error("No such job: {0}")]
    NoSuchJob(String),

    #[error(transparent)]
    NoSuchTarget(#[from] UnknownTarget),

    #[error(transparent)]
    ReadOnly(#[from] ReadOnlyViolation),

    #[error("Execution {id} in schema target {target} changed since version {version} was read")]
    OptimisticLock {
        id: i64,
        target: String,
        version: i64,
    },

    #[error("Launcher error: {0}")]
    Launcher(anyhow::Error),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl LifecycleError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LifecycleError::NotFound { .. }
                | LifecycleError::NoSuchJob(_)
                | LifecycleError::NoSuchTarget(_)
        )
    }

    /// The requested transition is not allowed from the current status.
    pub fn is_invalid_state(&self) -> bool {
        matches!(
            self,
            LifecycleError::ExecutionNotRunning { .. }
                | LifecycleError::AlreadyRunning { .. }
                | LifecycleError::NotRestartable { .. }
        )
    }
}
