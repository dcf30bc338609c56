//! Task records: identity, scheduling metadata and failure bookkeeping.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::checkpoint::StepCursor;
use super::ids::TaskId;
use super::state::TaskStatus;

/// Quantum counter value. Quantum 0 is "before the first tick".
pub type Quantum = u64;

/// Stable name of the step function that drives a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Scheduling priority. Lower values are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    pub const HIGH: Priority = Priority(0);
    pub const NORMAL: Priority = Priority(100);
    pub const LOW: Priority = Priority(200);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a task ended up `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    Cancelled,
    RetriesExhausted(String),
    Unrecoverable(String),
    MissingHandler(TaskType),
    CorruptCheckpoint(String),
    Panicked(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Cancelled => f.write_str("cancelled"),
            FailureReason::RetriesExhausted(e) => write!(f, "retries exhausted: {e}"),
            FailureReason::Unrecoverable(e) => write!(f, "unrecoverable: {e}"),
            FailureReason::MissingHandler(t) => write!(f, "no handler for task type {t}"),
            FailureReason::CorruptCheckpoint(e) => write!(f, "corrupt checkpoint: {e}"),
            FailureReason::Panicked(e) => write!(f, "step panicked: {e}"),
        }
    }
}

/// What a caller submits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Caller-supplied id. Generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TaskId>,

    pub kind: TaskType,

    /// Initial task state, decoded by the handler registered for `kind`.
    #[serde(default)]
    pub input: serde_json::Value,

    #[serde(default)]
    pub priority: Priority,

    /// Overrides the configured retry limit for this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl TaskDescriptor {
    pub fn new(kind: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: None,
            kind: TaskType::new(kind),
            input,
            priority: Priority::default(),
            max_retries: None,
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Registry entry for a task. The single source of truth for its status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub kind: TaskType,
    pub input: serde_json::Value,
    pub priority: Priority,
    pub status: TaskStatus,

    /// Submission order, used to break ties between equal keys.
    pub seq: u64,

    /// Cursor of the last durably saved checkpoint (diagnostic mirror).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<StepCursor>,

    pub retry_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,

    /// Set when a cancel arrives while the task is `Running`.
    #[serde(default)]
    pub cancel_requested: bool,

    pub created_at: Quantum,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<Quantum>,

    /// Backoff gate: not selected before this quantum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<Quantum>,
}

/// Ordering key used for scheduling: `(priority, service stamp, seq)`.
pub type ScheduleKey = (Priority, Quantum, u64);

impl TaskRecord {
    pub fn new(id: TaskId, descriptor: TaskDescriptor, seq: u64, created_at: Quantum) -> Self {
        Self {
            id,
            kind: descriptor.kind,
            input: descriptor.input,
            priority: descriptor.priority,
            status: TaskStatus::Pending,
            seq,
            cursor: None,
            retry_count: 0,
            max_retries: descriptor.max_retries,
            last_error: None,
            failure: None,
            cancel_requested: false,
            created_at,
            last_run_at: None,
            not_before: None,
        }
    }

    /// When this task was last served, or submitted if it never ran.
    ///
    /// Sorting by this stamp inside a priority band moves every served task
    /// behind the ones that have waited longer.
    pub fn service_stamp(&self) -> Quantum {
        self.last_run_at.unwrap_or(self.created_at)
    }

    pub fn schedule_key(&self) -> ScheduleKey {
        (self.priority, self.service_stamp(), self.seq)
    }

    /// Runnable and past its backoff gate at quantum `now`.
    pub fn is_eligible(&self, now: Quantum) -> bool {
        self.status.is_runnable() && self.not_before.is_none_or(|gate| gate <= now)
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id,
            kind: self.kind.clone(),
            priority: self.priority,
            status: self.status,
            cursor: self.cursor,
            retry_count: self.retry_count,
            last_error: self.last_error.clone(),
            failure: self.failure.clone(),
            created_at: self.created_at,
            last_run_at: self.last_run_at,
        }
    }
}

/// Caller-facing view of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub kind: TaskType,
    pub priority: Priority,
    pub status: TaskStatus,
    pub cursor: Option<StepCursor>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub failure: Option<FailureReason>,
    pub created_at: Quantum,
    pub last_run_at: Option<Quantum>,
}
