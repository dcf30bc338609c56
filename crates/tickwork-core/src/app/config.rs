//! Scheduler configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! Environment variables override file values:
//! - `TICKWORK_BUDGET_PER_QUANTUM`
//! - `TICKWORK_STEP_COST`
//! - `TICKWORK_SAFETY_MARGIN`
//! - `TICKWORK_SLICE_STEPS`
//! - `TICKWORK_RETAIN_CHECKPOINTS`
//! - `TICKWORK_MAX_RETRIES`
//! - `TICKWORK_BACKOFF_BASE_QUANTA`

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Cost units the scheduler allows itself per quantum.
    pub budget_per_quantum: u64,

    /// Cost charged for a step that does not report its own.
    pub step_cost: u64,

    /// Units kept unspent so the loop can persist and yield before the host
    /// cuts the quantum off.
    pub safety_margin: u64,

    /// Steps a task may take per pass before the next task gets its turn.
    pub slice_steps: u32,

    /// Keep the last checkpoint of completed tasks instead of clearing it.
    pub retain_checkpoints: bool,

    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            budget_per_quantum: 100,
            step_cost: 1,
            safety_margin: 5,
            slice_steps: 1,
            retain_checkpoints: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply `TICKWORK_*` overrides read through `lookup`.
    pub fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        override_with(&lookup, "TICKWORK_BUDGET_PER_QUANTUM", &mut self.budget_per_quantum)?;
        override_with(&lookup, "TICKWORK_STEP_COST", &mut self.step_cost)?;
        override_with(&lookup, "TICKWORK_SAFETY_MARGIN", &mut self.safety_margin)?;
        override_with(&lookup, "TICKWORK_SLICE_STEPS", &mut self.slice_steps)?;
        override_with(&lookup, "TICKWORK_RETAIN_CHECKPOINTS", &mut self.retain_checkpoints)?;
        override_with(&lookup, "TICKWORK_MAX_RETRIES", &mut self.retry.max_retries)?;
        override_with(
            &lookup,
            "TICKWORK_BACKOFF_BASE_QUANTA",
            &mut self.retry.backoff_base_quanta,
        )?;
        Ok(self)
    }
}

fn override_with<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    slot: &mut T,
) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string()))?;
    }
    Ok(())
}
