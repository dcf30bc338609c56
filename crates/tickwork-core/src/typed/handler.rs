//! Step functions.
//!
//! Two layers, as with any type-erased registry:
//! - `Handler<T>`: what users implement, typed on their `Task` state.
//! - `DynHandler`: object-safe form working on JSON checkpoints, produced by
//!   wrapping a handler in `TypedHandler<T, H>`.

use std::marker::PhantomData;

use async_trait::async_trait;

use super::task::Task;
use crate::domain::{Checkpoint, Effect, StepCursor, StepError};

/// Outcome of one successful step.
#[derive(Debug, Clone, PartialEq)]
pub struct Step<S> {
    /// State to persist as the next checkpoint.
    pub state: S,

    /// Effects to commit before the checkpoint is saved.
    pub effects: Vec<Effect>,

    /// The task has nothing left to do.
    pub done: bool,

    /// Cost charged to the quantum; the configured step cost when `None`.
    pub cost: Option<u64>,
}

impl<S> Step<S> {
    /// More steps follow.
    pub fn next(state: S) -> Self {
        Self {
            state,
            effects: Vec::new(),
            done: false,
            cost: None,
        }
    }

    /// This was the last step.
    pub fn done(state: S) -> Self {
        Self {
            done: true,
            ..Self::next(state)
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_cost(mut self, cost: u64) -> Self {
        self.cost = Some(cost);
        self
    }

    fn map_state<U>(self, f: impl FnOnce(S) -> U) -> Step<U> {
        Step {
            state: f(self.state),
            effects: self.effects,
            done: self.done,
            cost: self.cost,
        }
    }
}

/// Step function of task `T`.
///
/// A step must be a single atomic unit of progress: it reads `task` as of
/// `cursor` and returns the next state plus the effects to commit. It must not
/// perform externally visible work itself, because it may run again from the
/// same checkpoint after an interruption.
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn step(&self, cursor: StepCursor, task: T) -> Result<Step<T>, StepError>;
}

/// Object-safe step function over JSON checkpoints.
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn step_dyn(&self, checkpoint: &Checkpoint) -> Result<Step<serde_json::Value>, StepError>;

    fn task_type(&self) -> &str;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn step_dyn(&self, checkpoint: &Checkpoint) -> Result<Step<serde_json::Value>, StepError> {
        let task: T = serde_json::from_value(checkpoint.state.clone()).map_err(|e| {
            StepError::unrecoverable(format!("cannot decode {} state: {e}", T::TYPE))
        })?;

        let step = self.handler.step(checkpoint.cursor, task).await?;

        let state = serde_json::to_value(&step.state).map_err(|e| {
            StepError::unrecoverable(format!("cannot encode {} state: {e}", T::TYPE))
        })?;
        Ok(step.map_state(|_| state))
    }

    fn task_type(&self) -> &str {
        T::TYPE
    }
}
