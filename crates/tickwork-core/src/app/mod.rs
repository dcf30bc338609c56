//! App - the scheduler assembled from ports.
//!
//! # Components
//! - **CostLedger**: consumption against the quantum budget
//! - **TaskRegistry**: task records and the status state machine
//! - **IdempotencyGuard**: at-most-once effects per `(task, cursor)`
//! - **Scheduler**: the per-quantum loop and caller API
//! - **SchedulerBuilder**: wiring with fail-fast task type checks

pub mod builder;
pub mod config;
pub mod guard;
pub mod ledger;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod status;

#[cfg(test)]
mod scenarios;

pub use self::builder::{BuildError, SchedulerBuilder};
pub use self::config::{ConfigError, SchedulerConfig};
pub use self::guard::{GuardOutcome, IdempotencyGuard};
pub use self::ledger::CostLedger;
pub use self::registry::{CancelOutcome, Listing, TaskRegistry};
pub use self::retry::{RetryDecision, RetryPolicy};
pub use self::scheduler::{QuantumReport, Scheduler};
pub use self::status::StatusCounts;
