//! Error taxonomy.
//!
//! - API misuse (`SchedulerError`, `CancelError`): surfaced to the caller, never retried.
//! - Step errors (`StepError`): caught by the scheduler and turned into a status change.
//! - Persistence errors (`StoreError`): fatal to the step that hit them.

use thiserror::Error;

use super::ids::TaskId;
use super::state::TaskStatus;
use super::task::TaskType;

/// Failure of a store or codec.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unsupported checkpoint version {found} (newest known is {supported})")]
    UnsupportedVersion { found: u16, supported: u16 },

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Errors of the caller-facing scheduler API.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task {0} already exists")]
    DuplicateTask(TaskId),

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("invalid transition for task {id}: expected {expected}, found {actual}, requested {requested}")]
    InvalidTransition {
        id: TaskId,
        expected: TaskStatus,
        actual: TaskStatus,
        requested: TaskStatus,
    },

    #[error("no handler registered for task type {0}")]
    UnknownTaskType(TaskType),

    #[error("task {id} is still {status}; only terminal tasks can be purged")]
    NotTerminal { id: TaskId, status: TaskStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors of `cancel`.
#[derive(Debug, Error)]
pub enum CancelError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("task {id} is already {status}")]
    AlreadyTerminal { id: TaskId, status: TaskStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How the scheduler should treat a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepErrorKind {
    /// Retry from the last checkpoint in a later quantum, up to the retry limit.
    Recoverable,

    /// Fail the task immediately.
    Unrecoverable,
}

/// Error reported by a step function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StepError {
    pub kind: StepErrorKind,
    pub message: String,
}

impl StepError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            kind: StepErrorKind::Recoverable,
            message: message.into(),
        }
    }

    pub fn unrecoverable(message: impl Into<String>) -> Self {
        Self {
            kind: StepErrorKind::Unrecoverable,
            message: message.into(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind == StepErrorKind::Recoverable
    }
}

impl From<StoreError> for StepError {
    /// Persistence failures leave the task at its last durable checkpoint.
    fn from(err: StoreError) -> Self {
        StepError::recoverable(format!("persistence failure: {err}"))
    }
}
