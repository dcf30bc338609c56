//! TaskRegistry - authoritative task metadata and the status state machine.
//!
//! Every write goes through a status-guarded replace on the `TaskStore`, so a
//! transition only happens if the task is still in the status the caller saw.
//! Mutations are applied to a freshly read record; fields the caller does not
//! touch (such as a pending cancellation) are never overwritten with stale
//! values.

use std::sync::Arc;

use crate::domain::{
    CancelError, FailureReason, Quantum, SchedulerError, StoreError, TaskDescriptor, TaskId,
    TaskRecord, TaskStatus, TaskSummary,
};
use crate::ports::{IdGenerator, ReplaceOutcome, TaskStore};

use super::status::StatusCounts;

/// Result of `cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task was not running and is now `Failed(Cancelled)`.
    Cancelled,
    /// The task is running; it is failed at the start of the next quantum.
    Deferred,
}

/// Snapshot of task summaries in scheduling order.
///
/// Iterating consumes the cursor, not the snapshot; `restart` rewinds it.
#[derive(Debug, Clone)]
pub struct Listing {
    items: Vec<TaskSummary>,
    pos: usize,
}

impl Listing {
    fn new(items: Vec<TaskSummary>) -> Self {
        Self { items, pos: 0 }
    }

    pub fn restart(&mut self) {
        self.pos = 0;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<TaskSummary> {
        self.items
    }
}

impl Iterator for Listing {
    type Item = TaskSummary;

    fn next(&mut self) -> Option<TaskSummary> {
        let item = self.items.get(self.pos).cloned()?;
        self.pos += 1;
        Some(item)
    }
}

pub struct TaskRegistry {
    store: Arc<dyn TaskStore>,
    ids: Arc<dyn IdGenerator>,
}

impl TaskRegistry {
    pub fn new(store: Arc<dyn TaskStore>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { store, ids }
    }

    /// Create a `Pending` task. Task-type validation is the caller's job.
    pub async fn submit(&self, descriptor: TaskDescriptor) -> Result<TaskId, SchedulerError> {
        let id = descriptor.id.unwrap_or_else(|| self.ids.generate_task_id());
        let seq = self.store.next_seq().await?;
        let created_at = self.store.current_quantum().await?;

        let record = TaskRecord::new(id, descriptor, seq, created_at);
        if !self.store.insert(record).await? {
            return Err(SchedulerError::DuplicateTask(id));
        }
        tracing::debug!(task_id = %id, seq, created_at, "task submitted");
        Ok(id)
    }

    pub async fn get(&self, id: TaskId) -> Result<TaskRecord, SchedulerError> {
        self.store
            .get(id)
            .await?
            .ok_or(SchedulerError::NotFound(id))
    }

    pub async fn status(&self, id: TaskId) -> Result<TaskStatus, SchedulerError> {
        Ok(self.get(id).await?.status)
    }

    /// Tasks in scheduling order, optionally only those in `filter`.
    pub async fn list(&self, filter: Option<TaskStatus>) -> Result<Listing, StoreError> {
        let mut records = self.store.list().await?;
        records.retain(|r| filter.is_none_or(|status| r.status == status));
        records.sort_by_key(TaskRecord::schedule_key);
        Ok(Listing::new(records.iter().map(TaskRecord::summary).collect()))
    }

    pub async fn counts(&self) -> Result<StatusCounts, StoreError> {
        Ok(self.store.list().await?.iter().map(|r| r.status).collect())
    }

    /// Compare-and-set status change.
    pub async fn transition(
        &self,
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<TaskRecord, SchedulerError> {
        self.transition_with(id, from, to, |_| {}).await
    }

    /// Compare-and-set status change that also edits other fields.
    pub async fn transition_with(
        &self,
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
        edit: impl FnOnce(&mut TaskRecord),
    ) -> Result<TaskRecord, SchedulerError> {
        let invalid = |actual| SchedulerError::InvalidTransition {
            id,
            expected: from,
            actual,
            requested: to,
        };
        if !from.can_transition_to(to) {
            return Err(invalid(from));
        }

        let mut record = self.get(id).await?;
        if record.status != from {
            return Err(invalid(record.status));
        }
        edit(&mut record);
        record.status = to;

        match self.store.replace(record.clone(), from).await? {
            ReplaceOutcome::Replaced => {
                tracing::debug!(task_id = %id, from = %from, to = %to, "task transitioned");
                Ok(record)
            }
            ReplaceOutcome::Missing => Err(SchedulerError::NotFound(id)),
            ReplaceOutcome::StatusMismatch(actual) => Err(invalid(actual)),
        }
    }

    /// Edit a record without changing its status.
    pub async fn update(
        &self,
        id: TaskId,
        expected: TaskStatus,
        edit: impl FnOnce(&mut TaskRecord),
    ) -> Result<TaskRecord, SchedulerError> {
        let mut record = self.get(id).await?;
        let mismatch = |actual| SchedulerError::InvalidTransition {
            id,
            expected,
            actual,
            requested: expected,
        };
        if record.status != expected || expected.is_terminal() {
            return Err(mismatch(record.status));
        }
        edit(&mut record);
        record.status = expected;

        match self.store.replace(record.clone(), expected).await? {
            ReplaceOutcome::Replaced => Ok(record),
            ReplaceOutcome::Missing => Err(SchedulerError::NotFound(id)),
            ReplaceOutcome::StatusMismatch(actual) => Err(mismatch(actual)),
        }
    }

    /// Fail a non-terminal task with `reason`.
    pub async fn fail(
        &self,
        id: TaskId,
        from: TaskStatus,
        reason: FailureReason,
    ) -> Result<TaskRecord, SchedulerError> {
        tracing::info!(task_id = %id, reason = %reason, "task failed");
        self.transition_with(id, from, TaskStatus::Failed, |r| {
            if reason != FailureReason::Cancelled {
                r.last_error = Some(reason.to_string());
            }
            r.cancel_requested = false;
            r.not_before = None;
            r.failure = Some(reason);
        })
        .await
    }

    pub async fn cancel(&self, id: TaskId) -> Result<CancelOutcome, CancelError> {
        loop {
            let mut record = self.store.get(id).await?.ok_or(CancelError::NotFound(id))?;
            let (expected, outcome) = match record.status {
                status if status.is_terminal() => {
                    return Err(CancelError::AlreadyTerminal { id, status });
                }
                TaskStatus::Running => {
                    record.cancel_requested = true;
                    (TaskStatus::Running, CancelOutcome::Deferred)
                }
                status => {
                    record.status = TaskStatus::Failed;
                    record.failure = Some(FailureReason::Cancelled);
                    record.not_before = None;
                    (status, CancelOutcome::Cancelled)
                }
            };
            match self.store.replace(record, expected).await? {
                ReplaceOutcome::Replaced => {
                    tracing::info!(task_id = %id, ?outcome, "task cancelled");
                    return Ok(outcome);
                }
                ReplaceOutcome::Missing => return Err(CancelError::NotFound(id)),
                // Status moved underneath us; look again.
                ReplaceOutcome::StatusMismatch(_) => continue,
            }
        }
    }

    /// Remove a terminal task. Its id stays retired.
    pub async fn purge(&self, id: TaskId) -> Result<TaskRecord, SchedulerError> {
        let record = self.get(id).await?;
        if !record.status.is_terminal() {
            return Err(SchedulerError::NotTerminal {
                id,
                status: record.status,
            });
        }
        self.store
            .remove(id)
            .await?
            .ok_or(SchedulerError::NotFound(id))
    }

    /// Start a quantum and return its number.
    pub async fn begin_quantum(&self) -> Result<Quantum, StoreError> {
        self.store.advance_quantum().await
    }

    pub async fn current_quantum(&self) -> Result<Quantum, StoreError> {
        self.store.current_quantum().await
    }

    /// Tasks left `Running` by a quantum that was cut off become `Suspended`.
    pub async fn recover_interrupted(&self) -> Result<Vec<TaskId>, SchedulerError> {
        let mut recovered = Vec::new();
        for record in self.store.list().await? {
            if record.status != TaskStatus::Running {
                continue;
            }
            self.transition(record.id, TaskStatus::Running, TaskStatus::Suspended)
                .await?;
            tracing::warn!(task_id = %record.id, "recovered task interrupted mid-quantum");
            recovered.push(record.id);
        }
        Ok(recovered)
    }

    /// Non-terminal tasks with a deferred cancellation.
    pub async fn cancellations(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let mut records = self.store.list().await?;
        records.retain(|r| r.cancel_requested && !r.status.is_terminal());
        Ok(records)
    }

    /// Tasks eligible to run in quantum `now`, in scheduling order.
    pub async fn runnable(&self, now: Quantum) -> Result<Vec<TaskRecord>, StoreError> {
        let mut records = self.store.list().await?;
        records.retain(|r| r.is_eligible(now) && !r.cancel_requested);
        records.sort_by_key(TaskRecord::schedule_key);
        Ok(records)
    }
}
