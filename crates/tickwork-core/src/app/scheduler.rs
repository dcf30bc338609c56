//! Scheduler - the per-quantum entry point and caller-facing facade.
//!
//! # Quantum flow
//! 1. advance the durable quantum counter, reset the ledger
//! 2. suspend tasks a cut-off quantum left `Running`, fail deferred cancellations
//! 3. drive eligible tasks in passes, `slice_steps` steps per task per pass,
//!    while the ledger can afford another step at the task's last known cost
//! 4. per step: commit effects, then save the next checkpoint
//! 5. on exhaustion every task still `Running` is suspended
//!
//! The host ending the quantum early is the `run_quantum` future being
//! dropped at an `.await`. Nothing it held in memory is needed afterwards.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;

use super::config::SchedulerConfig;
use super::guard::IdempotencyGuard;
use super::ledger::CostLedger;
use super::registry::{CancelOutcome, TaskRegistry};
use super::retry::RetryDecision;
use super::status::StatusCounts;
use crate::domain::{
    CancelError, Checkpoint, Effect, EffectKey, FailureReason, Priority, Quantum,
    SchedulerError, StepError, StoreError, TaskDescriptor, TaskId, TaskRecord, TaskStatus,
    TaskSummary,
};
use crate::ports::CheckpointStore;
use crate::typed::{CheckpointCodec, DynHandler, HandlerRegistry, Step, Task};

/// What one quantum did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuantumReport {
    pub quantum: Quantum,
    pub steps_run: u64,
    pub cost_consumed: u64,
    pub completed: Vec<TaskId>,
    /// Suspended by budget exhaustion or a recoverable error.
    pub suspended: Vec<TaskId>,
    pub failed: Vec<TaskId>,
    /// Found `Running` at quantum start, left behind by a cut-off quantum.
    pub recovered: Vec<TaskId>,
    /// The ledger stopped the quantum with work left.
    pub exhausted: bool,
    /// The task store failed; the quantum stopped early.
    pub aborted: Option<String>,
}

/// One selected task within a quantum.
struct Lane {
    record: TaskRecord,
    active: Option<Active>,
    finished: bool,
    /// Cost charged for this lane's previous step this quantum.
    last_cost: u64,
}

struct Active {
    handler: Arc<dyn DynHandler>,
    checkpoint: Checkpoint,
}

impl Lane {
    fn new(record: TaskRecord) -> Self {
        Self {
            record,
            active: None,
            finished: false,
            last_cost: 0,
        }
    }

    fn id(&self) -> TaskId {
        self.record.id
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    handlers: HandlerRegistry,
    tasks: TaskRegistry,
    checkpoints: Arc<dyn CheckpointStore>,
    guard: IdempotencyGuard,
    codec: CheckpointCodec,
    ledger: CostLedger,
}

impl Scheduler {
    pub(crate) fn from_parts(
        config: SchedulerConfig,
        handlers: HandlerRegistry,
        tasks: TaskRegistry,
        checkpoints: Arc<dyn CheckpointStore>,
        guard: IdempotencyGuard,
        ledger: CostLedger,
    ) -> Self {
        Self {
            config,
            handlers,
            tasks,
            checkpoints,
            guard,
            codec: CheckpointCodec,
            ledger,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }

    // ---- caller API ----

    pub async fn submit(&self, descriptor: TaskDescriptor) -> Result<TaskId, SchedulerError> {
        if !self.handlers.contains(&descriptor.kind) {
            return Err(SchedulerError::UnknownTaskType(descriptor.kind));
        }
        self.tasks.submit(descriptor).await
    }

    /// Submit typed task state under `T::TYPE`.
    pub async fn submit_task<T: Task>(
        &self,
        task: &T,
        priority: Priority,
    ) -> Result<TaskId, SchedulerError> {
        let input = serde_json::to_value(task).map_err(StoreError::from)?;
        self.submit(TaskDescriptor::new(T::TYPE, input).with_priority(priority))
            .await
    }

    pub async fn get(&self, id: TaskId) -> Result<TaskRecord, SchedulerError> {
        self.tasks.get(id).await
    }

    pub async fn status(&self, id: TaskId) -> Result<TaskStatus, SchedulerError> {
        self.tasks.status(id).await
    }

    pub async fn cancel(&self, id: TaskId) -> Result<CancelOutcome, CancelError> {
        self.tasks.cancel(id).await
    }

    pub async fn list(&self, filter: Option<TaskStatus>) -> Result<Vec<TaskSummary>, SchedulerError> {
        Ok(self.tasks.list(filter).await?.into_vec())
    }

    pub async fn counts(&self) -> Result<StatusCounts, SchedulerError> {
        Ok(self.tasks.counts().await?)
    }

    /// Committed effects of a task, in step order.
    pub async fn effects(&self, id: TaskId) -> Result<Vec<Effect>, SchedulerError> {
        Ok(self
            .guard
            .effects(id)
            .await?
            .into_iter()
            .flat_map(|entry| entry.effects)
            .collect())
    }

    /// Drop a terminal task together with its checkpoint and journal entries.
    pub async fn purge(&self, id: TaskId) -> Result<TaskRecord, SchedulerError> {
        let record = self.tasks.get(id).await?;
        if !record.status.is_terminal() {
            return Err(SchedulerError::NotTerminal {
                id,
                status: record.status,
            });
        }
        // Record last: an interrupted purge leaves a terminal task that can be purged again.
        self.checkpoints.clear(id).await?;
        let forgotten = self.guard.forget(id).await?;
        let record = self.tasks.purge(id).await?;
        tracing::info!(task_id = %id, forgotten, "task purged");
        Ok(record)
    }

    /// Run quanta until no task is left outstanding or `max_quanta` ran.
    pub async fn run_until_settled(
        &mut self,
        max_quanta: u64,
    ) -> Result<Vec<QuantumReport>, SchedulerError> {
        let mut reports = Vec::new();
        for _ in 0..max_quanta {
            if self.tasks.counts().await?.outstanding() == 0 {
                break;
            }
            reports.push(self.run_quantum().await);
        }
        Ok(reports)
    }

    // ---- quantum ----

    /// Entry point invoked once per host tick. Never fails; problems are in
    /// the report and in task statuses.
    pub async fn run_quantum(&mut self) -> QuantumReport {
        let mut report = QuantumReport::default();
        self.ledger.reset();

        if let Err(err) = self.drive_quantum(&mut report).await {
            tracing::error!(quantum = report.quantum, error = %err, "quantum aborted");
            report.aborted = Some(err.to_string());
        }
        report.cost_consumed = self.ledger.consumed();

        tracing::info!(
            quantum = report.quantum,
            steps = report.steps_run,
            cost = report.cost_consumed,
            completed = report.completed.len(),
            suspended = report.suspended.len(),
            failed = report.failed.len(),
            exhausted = report.exhausted,
            "quantum finished"
        );
        report
    }

    async fn drive_quantum(&mut self, report: &mut QuantumReport) -> Result<(), SchedulerError> {
        let quantum = self.tasks.begin_quantum().await?;
        report.quantum = quantum;
        tracing::debug!(quantum, budget = self.ledger.remaining(), "quantum started");

        report.recovered = self.tasks.recover_interrupted().await?;
        for record in self.tasks.cancellations().await? {
            self.fail(record.id, record.status, FailureReason::Cancelled, report)
                .await;
        }

        let mut lanes: Vec<Lane> = self
            .tasks
            .runnable(quantum)
            .await?
            .into_iter()
            .map(Lane::new)
            .collect();
        let slice = self.config.slice_steps.max(1);

        'passes: loop {
            let mut stepped = false;
            for lane in lanes.iter_mut().filter(|lane| !lane.finished) {
                for _ in 0..slice {
                    // A task that reports its own cost is expected to cost as much again.
                    let expected = self.config.step_cost.max(lane.last_cost);
                    if !self.ledger.can_afford(expected) {
                        report.exhausted = true;
                        break 'passes;
                    }
                    if lane.active.is_none() && !self.start(lane, quantum, report).await {
                        break;
                    }
                    stepped = true;
                    if self.step(lane, quantum, report).await {
                        break;
                    }
                }
            }
            if !stepped {
                break;
            }
        }

        if report.exhausted {
            for lane in lanes.iter().filter(|l| l.active.is_some() && !l.finished) {
                match self
                    .tasks
                    .transition(lane.id(), TaskStatus::Running, TaskStatus::Suspended)
                    .await
                {
                    Ok(_) => {
                        tracing::debug!(task_id = %lane.id(), quantum, "budget exhausted, task suspended");
                        report.suspended.push(lane.id());
                    }
                    Err(err) => {
                        tracing::warn!(task_id = %lane.id(), error = %err, "could not suspend task");
                    }
                }
            }
        }
        Ok(())
    }

    /// First visit of a lane this quantum. Returns `false` if it cannot run.
    async fn start(&mut self, lane: &mut Lane, quantum: Quantum, report: &mut QuantumReport) -> bool {
        let id = lane.id();
        let Some(handler) = self.handlers.get(&lane.record.kind) else {
            lane.finished = true;
            let reason = FailureReason::MissingHandler(lane.record.kind.clone());
            self.fail(id, lane.record.status, reason, report).await;
            return false;
        };

        let started = self
            .tasks
            .transition_with(id, lane.record.status, TaskStatus::Running, |r| {
                r.last_run_at = Some(quantum);
                r.not_before = None;
            })
            .await;
        match started {
            Ok(record) => lane.record = record,
            Err(err) => {
                tracing::warn!(task_id = %id, error = %err, "could not start task");
                lane.finished = true;
                return false;
            }
        }

        match self.load_checkpoint(&lane.record).await {
            Ok(checkpoint) => {
                tracing::debug!(task_id = %id, cursor = %checkpoint.cursor, "task resumed");
                lane.active = Some(Active {
                    handler,
                    checkpoint,
                });
                true
            }
            Err(StoreError::Io(err)) => {
                self.on_step_error(lane, StoreError::Io(err).into(), quantum, report)
                    .await;
                false
            }
            Err(err) => {
                lane.finished = true;
                let reason = FailureReason::CorruptCheckpoint(err.to_string());
                self.fail(id, TaskStatus::Running, reason, report).await;
                false
            }
        }
    }

    async fn load_checkpoint(&self, record: &TaskRecord) -> Result<Checkpoint, StoreError> {
        match self.checkpoints.load(record.id).await? {
            Some(encoded) => self.codec.decode(&encoded),
            None => Ok(Checkpoint::initial(record.input.clone())),
        }
    }

    async fn save_checkpoint(&self, id: TaskId, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let encoded = self.codec.encode(checkpoint)?;
        self.checkpoints.save(id, &encoded).await
    }

    /// Run one step of an active lane. Returns `true` once the lane is done
    /// for this quantum.
    async fn step(&mut self, lane: &mut Lane, quantum: Quantum, report: &mut QuantumReport) -> bool {
        let Some(active) = lane.active.as_ref() else {
            return true;
        };
        let handler = Arc::clone(&active.handler);
        let checkpoint = active.checkpoint.clone();

        let result = AssertUnwindSafe(handler.step_dyn(&checkpoint))
            .catch_unwind()
            .await;
        report.steps_run += 1;
        // A step always costs at least one unit, so every pass drains the ledger.

        match result {
            Ok(Ok(step)) => {
                lane.last_cost = step.cost.unwrap_or(self.config.step_cost).max(1);
                self.ledger.consume(lane.last_cost);
                self.commit_step(lane, checkpoint, step, quantum, report)
                    .await
            }
            Ok(Err(err)) => {
                self.ledger.consume(self.config.step_cost.max(1));
                self.on_step_error(lane, err, quantum, report).await
            }
            Err(payload) => {
                self.ledger.consume(self.config.step_cost.max(1));
                lane.finished = true;
                let reason = FailureReason::Panicked(panic_message(&*payload));
                self.fail(lane.id(), TaskStatus::Running, reason, report)
                    .await;
                true
            }
        }
    }

    async fn commit_step(
        &mut self,
        lane: &mut Lane,
        checkpoint: Checkpoint,
        step: Step<serde_json::Value>,
        quantum: Quantum,
        report: &mut QuantumReport,
    ) -> bool {
        let id = lane.id();
        let key = EffectKey::new(id, checkpoint.cursor);
        if let Err(err) = self.guard.apply(key, step.effects, quantum).await {
            return self.on_step_error(lane, err.into(), quantum, report).await;
        }

        let next = checkpoint.advance(step.state);
        if step.done {
            return self.complete(lane, next, quantum, report).await;
        }

        if let Err(err) = self.save_checkpoint(id, &next).await {
            return self.on_step_error(lane, err.into(), quantum, report).await;
        }
        let mirrored = self
            .tasks
            .update(id, TaskStatus::Running, |r| r.cursor = Some(next.cursor))
            .await;
        if let Err(err) = mirrored {
            tracing::warn!(task_id = %id, error = %err, "could not mirror cursor on task record");
        }
        tracing::trace!(task_id = %id, cursor = %next.cursor, "step checkpointed");

        if let Some(active) = lane.active.as_mut() {
            active.checkpoint = next;
        }
        false
    }

    async fn complete(
        &mut self,
        lane: &mut Lane,
        last: Checkpoint,
        quantum: Quantum,
        report: &mut QuantumReport,
    ) -> bool {
        let id = lane.id();
        if self.config.retain_checkpoints {
            if let Err(err) = self.save_checkpoint(id, &last).await {
                return self.on_step_error(lane, err.into(), quantum, report).await;
            }
        }
        lane.finished = true;

        let completed = self
            .tasks
            .transition_with(id, TaskStatus::Running, TaskStatus::Completed, |r| {
                r.cursor = Some(last.cursor);
                r.cancel_requested = false;
                r.not_before = None;
            })
            .await;
        if let Err(err) = completed {
            tracing::warn!(task_id = %id, error = %err, "could not complete task");
            return true;
        }
        tracing::info!(task_id = %id, quantum, cursor = %last.cursor, "task completed");
        report.completed.push(id);

        if !self.config.retain_checkpoints {
            if let Err(err) = self.checkpoints.clear(id).await {
                tracing::warn!(task_id = %id, error = %err, "could not clear checkpoint of completed task");
            }
        }
        true
    }

    /// Turn a failed step into a status change. Always ends the lane.
    async fn on_step_error(
        &mut self,
        lane: &mut Lane,
        err: StepError,
        quantum: Quantum,
        report: &mut QuantumReport,
    ) -> bool {
        lane.finished = true;
        let id = lane.id();

        if !err.is_recoverable() {
            let reason = FailureReason::Unrecoverable(err.message);
            self.fail(id, TaskStatus::Running, reason, report).await;
            return true;
        }

        let retry_count = lane.record.retry_count.saturating_add(1);
        let decision = self
            .config
            .retry
            .decide(retry_count, lane.record.max_retries, quantum);
        let message = err.message;
        let result = match decision {
            RetryDecision::RetryAt { not_before } => {
                tracing::info!(task_id = %id, retry_count, not_before, error = %message, "step failed, will retry");
                self.tasks
                    .transition_with(id, TaskStatus::Running, TaskStatus::Suspended, |r| {
                        r.retry_count = retry_count;
                        r.last_error = Some(message);
                        r.not_before = Some(not_before);
                    })
                    .await
                    .map(|_| report.suspended.push(id))
            }
            RetryDecision::GiveUp => {
                tracing::info!(task_id = %id, retry_count, error = %message, "step failed, retries exhausted");
                self.tasks
                    .transition_with(id, TaskStatus::Running, TaskStatus::Failed, |r| {
                        r.retry_count = retry_count;
                        r.last_error = Some(message.clone());
                        r.failure = Some(FailureReason::RetriesExhausted(message));
                        r.cancel_requested = false;
                    })
                    .await
                    .map(|_| report.failed.push(id))
            }
        };
        if let Err(err) = result {
            tracing::warn!(task_id = %id, error = %err, "could not record step failure");
        }
        true
    }

    async fn fail(
        &self,
        id: TaskId,
        from: TaskStatus,
        reason: FailureReason,
        report: &mut QuantumReport,
    ) {
        match self.tasks.fail(id, from, reason).await {
            Ok(_) => report.failed.push(id),
            Err(err) => tracing::warn!(task_id = %id, error = %err, "could not record task failure"),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
