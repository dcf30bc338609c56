//! Ports - the seams between the scheduler and its environment.
//!
//! Durable state sits behind `TaskStore`, `CheckpointStore` and
//! `EffectJournal`; the host's budget estimate behind `BudgetSignal`.
//! `impls` provides in-memory and file-backed implementations.

pub mod budget_signal;
pub mod checkpoint_store;
pub mod clock;
pub mod effect_journal;
pub mod id_generator;
pub mod task_store;

pub use self::budget_signal::BudgetSignal;
pub use self::checkpoint_store::CheckpointStore;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::effect_journal::EffectJournal;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::{ReplaceOutcome, TaskStore};
