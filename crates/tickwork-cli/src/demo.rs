//! Demo task types the CLI host can drive.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tickwork_core::{Effect, Handler, Step, StepCursor, StepError, Task};

/// Counts down, emitting one `tick` effect per step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Countdown {
    pub remaining: u32,
    #[serde(default)]
    pub emitted: u32,
}

impl Task for Countdown {
    const TYPE: &'static str = "demo.countdown.v1";
}

pub struct CountdownHandler;

#[async_trait]
impl Handler<Countdown> for CountdownHandler {
    async fn step(&self, _cursor: StepCursor, task: Countdown) -> Result<Step<Countdown>, StepError> {
        if task.remaining == 0 {
            return Ok(Step::done(task));
        }
        let next = Countdown {
            remaining: task.remaining - 1,
            emitted: task.emitted + 1,
        };
        let effect = Effect::new("tick", serde_json::json!({ "n": next.emitted }));
        let step = if next.remaining == 0 {
            Step::done(next)
        } else {
            Step::next(next)
        };
        Ok(step.with_effect(effect))
    }
}

/// Takes `steps` steps, each failing recoverably with probability `fail_rate`.
///
/// Whether a run of a step flakes is drawn fresh every time, so a retried step
/// can pass. That draw is the only impure part: a step that succeeds returns
/// state and effects that depend on the task state alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flaky {
    pub steps: u32,
    #[serde(default = "default_fail_rate")]
    pub fail_rate: f64,
    #[serde(default)]
    pub done: u32,
}

fn default_fail_rate() -> f64 {
    0.3
}

impl Task for Flaky {
    const TYPE: &'static str = "demo.flaky.v1";
}

pub struct FlakyHandler;

#[async_trait]
impl Handler<Flaky> for FlakyHandler {
    async fn step(&self, cursor: StepCursor, task: Flaky) -> Result<Step<Flaky>, StepError> {
        if rand::random::<f64>() < task.fail_rate {
            return Err(StepError::recoverable(format!("flaked at step {cursor}")));
        }
        let next = Flaky {
            done: task.done + 1,
            ..task
        };
        let effect = Effect::new("flaky.step", serde_json::json!({ "step": next.done }));
        let step = if next.done >= next.steps {
            Step::done(next)
        } else {
            Step::next(next)
        };
        Ok(step.with_effect(effect))
    }
}
