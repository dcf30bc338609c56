//! IdempotencyGuard - at-most-once effect application per step.

use std::sync::Arc;

use crate::domain::{Effect, EffectKey, JournalEntry, Quantum, StoreError, TaskId};
use crate::ports::EffectJournal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    Applied,
    /// The key was committed by an earlier, interrupted run of the same step.
    AlreadyApplied,
}

/// Commits the effects of a step under its `(task, cursor)` key.
///
/// Effects and key land in the journal in one durable write, so the only
/// torn state a cut-off can leave is "committed, cursor not yet advanced".
/// Re-running the step from its checkpoint then finds the key and skips.
pub struct IdempotencyGuard {
    journal: Arc<dyn EffectJournal>,
}

impl IdempotencyGuard {
    pub fn new(journal: Arc<dyn EffectJournal>) -> Self {
        Self { journal }
    }

    pub async fn apply(
        &self,
        key: EffectKey,
        effects: Vec<Effect>,
        quantum: Quantum,
    ) -> Result<GuardOutcome, StoreError> {
        // Nothing observable to deduplicate.
        if effects.is_empty() {
            return Ok(GuardOutcome::Applied);
        }

        let entry = JournalEntry {
            key,
            quantum,
            effects,
        };
        if self.journal.commit(entry).await? {
            tracing::trace!(key = %key, quantum, "effects committed");
            Ok(GuardOutcome::Applied)
        } else {
            tracing::debug!(key = %key, quantum, "effects already committed, skipping");
            Ok(GuardOutcome::AlreadyApplied)
        }
    }

    pub async fn is_applied(&self, key: &EffectKey) -> Result<bool, StoreError> {
        self.journal.contains(key).await
    }

    /// Committed effects of `task_id`, in step order.
    pub async fn effects(&self, task_id: TaskId) -> Result<Vec<JournalEntry>, StoreError> {
        let mut entries = self.journal.entries(Some(task_id)).await?;
        entries.sort_by_key(|e| e.key.cursor);
        Ok(entries)
    }

    pub async fn forget(&self, task_id: TaskId) -> Result<usize, StoreError> {
        self.journal.forget(task_id).await
    }
}
