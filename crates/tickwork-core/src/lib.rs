//! tickwork-core
//!
//! A persistent, idempotent, budget-aware task scheduler for hosts that cut
//! execution off once a per-quantum budget is spent and never resume the
//! halted call stack.
//!
//! # Modules
//! - **domain**: task records, statuses, checkpoints, effects, errors
//! - **ports**: store, budget, clock and id seams
//! - **impls**: in-memory and file-backed stores
//! - **typed**: typed step API (`Task`, `Handler`, `HandlerRegistry`, `CheckpointCodec`)
//! - **app**: cost ledger, task registry, idempotency guard, scheduler loop, builder

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use app::{
    CancelOutcome, QuantumReport, Scheduler, SchedulerBuilder, SchedulerConfig, StatusCounts,
};
pub use domain::{
    Effect, FailureReason, Priority, StepCursor, StepError, TaskDescriptor, TaskId, TaskStatus,
};
pub use typed::{Handler, Step, Task};
