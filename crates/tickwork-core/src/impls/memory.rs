//! In-memory stores.
//!
//! Durable for the lifetime of the process only. Shared through `Arc`, they
//! outlive any single scheduler instance, which is how tests model a quantum
//! being cut off and a fresh scheduler picking up afterwards.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::table::TaskTable;
use crate::domain::{
    EffectKey, EncodedCheckpoint, JournalEntry, Quantum, StoreError, TaskId, TaskRecord,
    TaskStatus,
};
use crate::ports::{CheckpointStore, EffectJournal, ReplaceOutcome, TaskStore};

#[derive(Default)]
pub struct InMemoryTaskStore {
    table: Mutex<TaskTable>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, record: TaskRecord) -> Result<bool, StoreError> {
        Ok(self.table.lock().await.insert(record))
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.table.lock().await.get(id))
    }

    async fn list(&self) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self.table.lock().await.list())
    }

    async fn replace(
        &self,
        record: TaskRecord,
        expected: TaskStatus,
    ) -> Result<ReplaceOutcome, StoreError> {
        Ok(self.table.lock().await.replace(record, expected))
    }

    async fn remove(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.table.lock().await.remove(id))
    }

    async fn next_seq(&self) -> Result<u64, StoreError> {
        Ok(self.table.lock().await.next_seq())
    }

    async fn current_quantum(&self) -> Result<Quantum, StoreError> {
        Ok(self.table.lock().await.quantum())
    }

    async fn advance_quantum(&self) -> Result<Quantum, StoreError> {
        Ok(self.table.lock().await.advance_quantum())
    }
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<HashMap<TaskId, EncodedCheckpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, task_id: TaskId, checkpoint: &EncodedCheckpoint) -> Result<(), StoreError> {
        self.checkpoints
            .lock()
            .await
            .insert(task_id, checkpoint.clone());
        Ok(())
    }

    async fn load(&self, task_id: TaskId) -> Result<Option<EncodedCheckpoint>, StoreError> {
        Ok(self.checkpoints.lock().await.get(&task_id).cloned())
    }

    async fn clear(&self, task_id: TaskId) -> Result<(), StoreError> {
        self.checkpoints.lock().await.remove(&task_id);
        Ok(())
    }
}

#[derive(Default)]
struct JournalState {
    entries: Vec<JournalEntry>,
    keys: HashSet<EffectKey>,
}

#[derive(Default)]
pub struct InMemoryEffectJournal {
    state: Mutex<JournalState>,
}

impl InMemoryEffectJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EffectJournal for InMemoryEffectJournal {
    async fn commit(&self, entry: JournalEntry) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if !state.keys.insert(entry.key) {
            return Ok(false);
        }
        state.entries.push(entry);
        Ok(true)
    }

    async fn contains(&self, key: &EffectKey) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.keys.contains(key))
    }

    async fn entries(&self, task_id: Option<TaskId>) -> Result<Vec<JournalEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| task_id.is_none_or(|id| e.key.task_id == id))
            .cloned()
            .collect())
    }

    async fn forget(&self, task_id: TaskId) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state.entries.retain(|e| e.key.task_id != task_id);
        state.keys.retain(|k| k.task_id != task_id);
        Ok(before - state.entries.len())
    }
}
