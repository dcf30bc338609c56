//! TaskStore port - durable backing of the task registry.
//!
//! The store holds task records and the two durable counters the scheduler
//! needs (submission sequence and quantum counter). Status rules live in
//! `app::registry`; the store only offers a status-guarded replace so the
//! registry can implement compare-and-set transitions on top of it.

use async_trait::async_trait;

use crate::domain::{Quantum, StoreError, TaskId, TaskRecord, TaskStatus};

/// Result of a status-guarded replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Replaced,
    Missing,
    /// The stored record had a different status; nothing was written.
    StatusMismatch(TaskStatus),
}

/// Source of truth for task records.
///
/// Every mutating call is durable when it returns.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new record. Returns `false` if the id is live or was ever used.
    async fn insert(&self, record: TaskRecord) -> Result<bool, StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    /// All records, in no particular order.
    async fn list(&self) -> Result<Vec<TaskRecord>, StoreError>;

    /// Replace a record only if its stored status equals `expected`.
    async fn replace(
        &self,
        record: TaskRecord,
        expected: TaskStatus,
    ) -> Result<ReplaceOutcome, StoreError>;

    /// Remove a record. Its id stays retired and is never accepted again.
    async fn remove(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    /// Allocate the next submission sequence number.
    async fn next_seq(&self) -> Result<u64, StoreError>;

    /// Last quantum that was started (0 before the first one).
    async fn current_quantum(&self) -> Result<Quantum, StoreError>;

    /// Start a new quantum and return its number.
    async fn advance_quantum(&self) -> Result<Quantum, StoreError>;
}
