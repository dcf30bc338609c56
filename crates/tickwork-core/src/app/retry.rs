//! Retry policy: retry limit and backoff measured in quanta.

use serde::{Deserialize, Serialize};

use crate::domain::Quantum;

/// What to do with a task whose step failed recoverably.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Suspend and become eligible again at quantum `not_before`.
    RetryAt { not_before: Quantum },
    GiveUp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Recoverable failures tolerated before the task fails for good.
    pub max_retries: u32,

    /// Quanta to wait after the first failure. Zero retries in the next quantum.
    pub backoff_base_quanta: u64,

    pub backoff_multiplier: f64,

    pub max_backoff_quanta: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_quanta: 1,
            backoff_multiplier: 2.0,
            max_backoff_quanta: 16,
        }
    }
}

impl RetryPolicy {
    /// Quanta to skip after failure number `retry_count` (1-indexed):
    /// `base * multiplier^(retry_count - 1)`, capped at `max_backoff_quanta`.
    pub fn backoff(&self, retry_count: u32) -> u64 {
        let exponent = retry_count.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.backoff_base_quanta as f64 * self.backoff_multiplier.powi(exponent);
        if !delay.is_finite() || delay >= self.max_backoff_quanta as f64 {
            return self.max_backoff_quanta;
        }
        delay.max(0.0).round() as u64
    }

    /// `retry_count` already includes the failure being decided on.
    pub fn decide(&self, retry_count: u32, limit: Option<u32>, now: Quantum) -> RetryDecision {
        let limit = limit.unwrap_or(self.max_retries);
        if retry_count >= limit {
            return RetryDecision::GiveUp;
        }
        // A suspended task is never retried inside the quantum that failed it.
        let not_before = now.saturating_add(1).saturating_add(self.backoff(retry_count));
        RetryDecision::RetryAt { not_before }
    }
}
