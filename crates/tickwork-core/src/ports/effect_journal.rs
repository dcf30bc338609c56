//! EffectJournal port - the outbox of externally visible effects.
//!
//! Committing an entry records the effects and their dedup key in a single
//! durable write. Consumers outside the scheduler read effects from here, so
//! "applied" and "marked applied" are the same fact.

use async_trait::async_trait;

use crate::domain::{EffectKey, JournalEntry, StoreError, TaskId};

#[async_trait]
pub trait EffectJournal: Send + Sync {
    /// Append `entry` unless its key is already present.
    ///
    /// Returns `false` (and writes nothing) when the key was committed before.
    async fn commit(&self, entry: JournalEntry) -> Result<bool, StoreError>;

    async fn contains(&self, key: &EffectKey) -> Result<bool, StoreError>;

    /// Committed entries in commit order, optionally for one task only.
    async fn entries(&self, task_id: Option<TaskId>) -> Result<Vec<JournalEntry>, StoreError>;

    /// Drop every entry of `task_id`. Returns how many were removed.
    async fn forget(&self, task_id: TaskId) -> Result<usize, StoreError>;
}
