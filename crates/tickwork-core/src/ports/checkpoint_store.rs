//! CheckpointStore port - durable per-task progress.

use async_trait::async_trait;

use crate::domain::{EncodedCheckpoint, StoreError, TaskId};

/// Persists encoded checkpoints.
///
/// The store never interprets the bytes. Once `save` returns, the checkpoint
/// must be recoverable even if the process is torn down immediately after.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist or overwrite the checkpoint of `task_id`.
    async fn save(&self, task_id: TaskId, checkpoint: &EncodedCheckpoint) -> Result<(), StoreError>;

    async fn load(&self, task_id: TaskId) -> Result<Option<EncodedCheckpoint>, StoreError>;

    /// Drop the checkpoint of `task_id`. Clearing a missing one is not an error.
    async fn clear(&self, task_id: TaskId) -> Result<(), StoreError>;
}
