//! Task status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a task.
///
/// Transitions:
/// - Pending -> Running -> Completed
/// - Pending -> Running -> Suspended -> Running -> ... (unbounded)
/// - Running -> Failed (unrecoverable error or retries exhausted)
/// - Pending | Suspended -> Failed (cancellation)
///
/// `Completed` and `Failed` are terminal: nothing leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Submitted, never scheduled.
    Pending,

    /// Picked up by the current quantum.
    Running,

    /// Has progress saved and waits for a later quantum.
    Suspended,

    /// Step cursor reported done.
    Completed,

    /// Cancelled, unrecoverable, or out of retries.
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Suspended,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Eligible for selection at the start of a quantum.
    pub fn is_runnable(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Suspended)
    }

    /// Is `self -> next` an edge of the transition graph?
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Suspended)
                | (Running, Failed)
                | (Suspended, Running)
                | (Suspended, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Suspended => "suspended",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown task status: {s}"))
    }
}
