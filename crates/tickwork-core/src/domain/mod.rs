//! Domain model: ids, task records, status machine, checkpoints, effects, errors.

pub mod checkpoint;
pub mod effect;
pub mod errors;
pub mod ids;
pub mod state;
pub mod task;

pub use checkpoint::{Checkpoint, EncodedCheckpoint, StepCursor};
pub use effect::{Effect, EffectKey, JournalEntry};
pub use errors::{CancelError, SchedulerError, StepError, StepErrorKind, StoreError};
pub use ids::{ParseIdError, TaskId};
pub use state::TaskStatus;
pub use task::{
    FailureReason, Priority, Quantum, ScheduleKey, TaskDescriptor, TaskRecord, TaskSummary,
    TaskType,
};
