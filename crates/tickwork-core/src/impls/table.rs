//! Task table shared by the in-memory and file-backed task stores.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::{Quantum, TaskId, TaskRecord, TaskStatus};
use crate::ports::ReplaceOutcome;

/// Records plus durable counters.
///
/// Removed ids go to `retired` so they are never accepted again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct TaskTable {
    #[serde(default)]
    records: BTreeMap<TaskId, TaskRecord>,

    #[serde(default)]
    retired: BTreeSet<TaskId>,

    #[serde(default)]
    seq: u64,

    #[serde(default)]
    quantum: Quantum,
}

impl TaskTable {
    pub(crate) fn insert(&mut self, record: TaskRecord) -> bool {
        if self.records.contains_key(&record.id) || self.retired.contains(&record.id) {
            return false;
        }
        self.records.insert(record.id, record);
        true
    }

    pub(crate) fn get(&self, id: TaskId) -> Option<TaskRecord> {
        self.records.get(&id).cloned()
    }

    pub(crate) fn list(&self) -> Vec<TaskRecord> {
        self.records.values().cloned().collect()
    }

    pub(crate) fn replace(&mut self, record: TaskRecord, expected: TaskStatus) -> ReplaceOutcome {
        let Some(current) = self.records.get_mut(&record.id) else {
            return ReplaceOutcome::Missing;
        };
        if current.status != expected {
            return ReplaceOutcome::StatusMismatch(current.status);
        }
        *current = record;
        ReplaceOutcome::Replaced
    }

    pub(crate) fn remove(&mut self, id: TaskId) -> Option<TaskRecord> {
        let removed = self.records.remove(&id)?;
        self.retired.insert(id);
        Some(removed)
    }

    pub(crate) fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    pub(crate) fn quantum(&self) -> Quantum {
        self.quantum
    }

    pub(crate) fn advance_quantum(&mut self) -> Quantum {
        self.quantum += 1;
        self.quantum
    }
}
