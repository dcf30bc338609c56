//! Snapshot-file task store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use super::atomic::{Detached, read_optional, write_atomic};
use crate::domain::{Quantum, StoreError, TaskId, TaskRecord, TaskStatus};
use crate::impls::table::TaskTable;
use crate::ports::{ReplaceOutcome, TaskStore};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    table: &'a TaskTable,
}

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    table: TaskTable,
}

/// Task store that rewrites one JSON snapshot per mutation.
///
/// The in-memory table only moves forward after the snapshot hit the disk.
/// When a write fails, or its future is dropped before the rename is seen to
/// finish, the next call reloads the snapshot instead of trusting memory.
pub struct FileTaskStore {
    path: PathBuf,
    state: Mutex<SnapshotState>,
}

struct SnapshotState {
    table: TaskTable,
    write: Detached,
    stale: bool,
}

impl FileTaskStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }

        let table = read_snapshot(&path).await?;
        Ok(Self {
            path,
            state: Mutex::new(SnapshotState {
                table,
                write: Detached::default(),
                stale: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock the table, reloading it first if the last write was interrupted.
    async fn fresh(&self) -> Result<MutexGuard<'_, SnapshotState>, StoreError> {
        let mut state = self.state.lock().await;
        if let Err(err) = state.write.settle().await {
            tracing::warn!(path = %self.path.display(), error = %err, "interrupted snapshot write failed");
        }
        if state.stale {
            tracing::debug!(path = %self.path.display(), "reloading task snapshot after interrupted write");
            state.table = read_snapshot(&self.path).await?;
            state.stale = false;
        }
        Ok(state)
    }

    async fn mutate<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut TaskTable) -> R + Send,
        R: Send,
    {
        let mut state = self.fresh().await?;
        let mut next = state.table.clone();
        let out = f(&mut next);
        if next != state.table {
            let data = serde_json::to_vec_pretty(&SnapshotRef {
                version: SNAPSHOT_VERSION,
                table: &next,
            })?;
            let path = self.path.clone();
            state.stale = true;
            state.write.start(async move { write_atomic(&path, &data).await });
            state.write.settle().await?;
            state.table = next;
            state.stale = false;
        }
        Ok(out)
    }
}

async fn read_snapshot(path: &Path) -> Result<TaskTable, StoreError> {
    let Some(bytes) = read_optional(path).await? else {
        return Ok(TaskTable::default());
    };
    let snapshot: Snapshot = serde_json::from_slice(&bytes)
        .map_err(|e| StoreError::Corrupt(format!("task snapshot {}: {e}", path.display())))?;
    if snapshot.version > SNAPSHOT_VERSION {
        return Err(StoreError::Corrupt(format!(
            "task snapshot {} has version {}, newest known is {SNAPSHOT_VERSION}",
            path.display(),
            snapshot.version
        )));
    }
    Ok(snapshot.table)
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn insert(&self, record: TaskRecord) -> Result<bool, StoreError> {
        self.mutate(|t| t.insert(record)).await
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.fresh().await?.table.get(id))
    }

    async fn list(&self) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self.fresh().await?.table.list())
    }

    async fn replace(
        &self,
        record: TaskRecord,
        expected: TaskStatus,
    ) -> Result<ReplaceOutcome, StoreError> {
        self.mutate(|t| t.replace(record, expected)).await
    }

    async fn remove(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        self.mutate(|t| t.remove(id)).await
    }

    async fn next_seq(&self) -> Result<u64, StoreError> {
        self.mutate(|t| t.next_seq()).await
    }

    async fn current_quantum(&self) -> Result<Quantum, StoreError> {
        Ok(self.fresh().await?.table.quantum())
    }

    async fn advance_quantum(&self) -> Result<Quantum, StoreError> {
        self.mutate(|t| t.advance_quantum()).await
    }
}
