//! One-file-per-task checkpoint store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::atomic::{Detached, read_optional, remove_synced, write_atomic};
use crate::domain::{EncodedCheckpoint, StoreError, TaskId};
use crate::ports::CheckpointStore;

/// Writes run detached and are waited for by the next call, so an
/// interrupted save never races a later save or load of the same file.
pub struct FileCheckpointStore {
    dir: PathBuf,
    write: Mutex<Detached>,
}

impl FileCheckpointStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write: Mutex::new(Detached::default()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, task_id: TaskId) -> PathBuf {
        self.dir.join(format!("{task_id}.ckpt"))
    }

    async fn settled(&self) -> tokio::sync::MutexGuard<'_, Detached> {
        let mut write = self.write.lock().await;
        if let Err(err) = write.settle().await {
            tracing::warn!(dir = %self.dir.display(), error = %err, "interrupted checkpoint write failed");
        }
        write
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, task_id: TaskId, checkpoint: &EncodedCheckpoint) -> Result<(), StoreError> {
        let mut write = self.settled().await;
        let (path, frame) = (self.path_for(task_id), checkpoint.to_frame());
        write.start(async move { write_atomic(&path, &frame).await });
        write.settle().await
    }

    async fn load(&self, task_id: TaskId) -> Result<Option<EncodedCheckpoint>, StoreError> {
        let _write = self.settled().await;
        let path = self.path_for(task_id);
        let Some(frame) = read_optional(&path).await? else {
            return Ok(None);
        };
        EncodedCheckpoint::from_frame(&frame)
            .map(Some)
            .ok_or_else(|| StoreError::Corrupt(format!("truncated checkpoint {}", path.display())))
    }

    async fn clear(&self, task_id: TaskId) -> Result<(), StoreError> {
        let mut write = self.settled().await;
        let path = self.path_for(task_id);
        write.start(async move { remove_synced(&path).await });
        write.settle().await
    }
}
