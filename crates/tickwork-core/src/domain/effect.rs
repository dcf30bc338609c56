//! Externally visible effects and their dedup keys.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::checkpoint::StepCursor;
use super::ids::TaskId;
use super::task::Quantum;

/// One externally visible output of a step.
///
/// Step functions return effects instead of performing them, so re-running a
/// step after an interruption never touches the outside world by itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub topic: String,
    pub payload: serde_json::Value,
}

impl Effect {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Dedup key of the effects produced by one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EffectKey {
    pub task_id: TaskId,
    pub cursor: StepCursor,
}

impl EffectKey {
    pub fn new(task_id: TaskId, cursor: StepCursor) -> Self {
        Self { task_id, cursor }
    }
}

impl fmt::Display for EffectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.task_id, self.cursor)
    }
}

/// A committed batch of effects, as recorded by the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub key: EffectKey,
    pub quantum: Quantum,
    pub effects: Vec<Effect>,
}
