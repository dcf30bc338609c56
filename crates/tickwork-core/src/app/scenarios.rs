//! End-to-end scheduler behaviour over shared stores.
//!
//! A host cut-off is simulated by a store wrapper that never returns after a
//! chosen call, combined with `tokio::time::timeout` on paused time. The
//! dropped `run_quantum` future is the interrupted quantum; a new scheduler
//! over the same stores is the next one. File-backed quanta are also dropped
//! after a few polls, while real writes are in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rstest::rstest;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::time::timeout;

use super::*;
use crate::domain::{
    CancelError, Effect, EffectKey, EncodedCheckpoint, FailureReason, JournalEntry, Priority,
    SchedulerError, StepCursor, StepError, StoreError, TaskDescriptor, TaskId, TaskStatus, TaskType,
};
use crate::impls::{FileStores, InMemoryCheckpointStore, InMemoryEffectJournal, InMemoryTaskStore};
use crate::ports::{CheckpointStore, EffectJournal};
use crate::typed::handler::fixtures::{Counter, CounterHandler};
use crate::typed::{CHECKPOINT_VERSION, Handler, Step, Task};

// ---- task types ----

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Flaky {
    label: String,
}

impl Task for Flaky {
    const TYPE: &'static str = "test.flaky.v1";
}

/// Fails recoverably for the first `failures` calls, then completes.
struct FlakyHandler {
    failures: u32,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Handler<Flaky> for FlakyHandler {
    async fn step(&self, _cursor: StepCursor, task: Flaky) -> Result<Step<Flaky>, StepError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(StepError::recoverable(format!("transient failure {call}")));
        }
        Ok(Step::done(task).with_effect(Effect::new("flaky", serde_json::json!({ "call": call }))))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Doomed {
    why: String,
}

impl Task for Doomed {
    const TYPE: &'static str = "test.doomed.v1";
}

struct FatalHandler;

#[async_trait]
impl Handler<Doomed> for FatalHandler {
    async fn step(&self, _cursor: StepCursor, task: Doomed) -> Result<Step<Doomed>, StepError> {
        Err(StepError::unrecoverable(task.why))
    }
}

struct PanickingHandler;

#[async_trait]
impl Handler<Doomed> for PanickingHandler {
    async fn step(&self, _cursor: StepCursor, _task: Doomed) -> Result<Step<Doomed>, StepError> {
        panic!("kaboom")
    }
}

/// Counts invocations of the wrapped handler.
struct Counted<H> {
    inner: H,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl<T: Task, H: Handler<T>> Handler<T> for Counted<H> {
    async fn step(&self, cursor: StepCursor, task: T) -> Result<Step<T>, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.step(cursor, task).await
    }
}

/// Counter whose steps report their own cost.
struct PricedCounter(u64);

#[async_trait]
impl Handler<Counter> for PricedCounter {
    async fn step(&self, cursor: StepCursor, task: Counter) -> Result<Step<Counter>, StepError> {
        Ok(CounterHandler.step(cursor, task).await?.with_cost(self.0))
    }
}

// ---- cut-off simulation ----

/// Lets `n` calls through, then never returns from the `n`-th.
struct Tripwire {
    remaining: AtomicUsize,
}

impl Tripwire {
    fn after(n: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(n),
        }
    }

    async fn pass(&self) {
        let before = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if before == Ok(1) {
            std::future::pending::<()>().await;
        }
    }
}

/// Journal cut off right after the `n`-th commit became durable.
struct CutJournal {
    inner: Arc<dyn EffectJournal>,
    trip: Tripwire,
}

#[async_trait]
impl EffectJournal for CutJournal {
    async fn commit(&self, entry: JournalEntry) -> Result<bool, StoreError> {
        let committed = self.inner.commit(entry).await?;
        self.trip.pass().await;
        Ok(committed)
    }

    async fn contains(&self, key: &EffectKey) -> Result<bool, StoreError> {
        self.inner.contains(key).await
    }

    async fn entries(&self, task_id: Option<TaskId>) -> Result<Vec<JournalEntry>, StoreError> {
        self.inner.entries(task_id).await
    }

    async fn forget(&self, task_id: TaskId) -> Result<usize, StoreError> {
        self.inner.forget(task_id).await
    }
}

/// Checkpoint store cut off right after the `n`-th save became durable.
struct CutCheckpoints {
    inner: Arc<dyn CheckpointStore>,
    trip: Tripwire,
}

#[async_trait]
impl CheckpointStore for CutCheckpoints {
    async fn save(&self, task_id: TaskId, checkpoint: &EncodedCheckpoint) -> Result<(), StoreError> {
        self.inner.save(task_id, checkpoint).await?;
        self.trip.pass().await;
        Ok(())
    }

    async fn load(&self, task_id: TaskId) -> Result<Option<EncodedCheckpoint>, StoreError> {
        self.inner.load(task_id).await
    }

    async fn clear(&self, task_id: TaskId) -> Result<(), StoreError> {
        self.inner.clear(task_id).await
    }
}

/// Checkpoint store whose saves always fail.
struct ReadOnlyCheckpoints(InMemoryCheckpointStore);

#[async_trait]
impl CheckpointStore for ReadOnlyCheckpoints {
    async fn save(&self, _task_id: TaskId, _checkpoint: &EncodedCheckpoint) -> Result<(), StoreError> {
        Err(StoreError::Io(std::io::Error::other("disk full")))
    }

    async fn load(&self, task_id: TaskId) -> Result<Option<EncodedCheckpoint>, StoreError> {
        self.0.load(task_id).await
    }

    async fn clear(&self, task_id: TaskId) -> Result<(), StoreError> {
        self.0.clear(task_id).await
    }
}

#[derive(Debug, Clone, Copy)]
enum Cut {
    AfterCommit,
    AfterSave,
}

// ---- helpers ----

struct Stores {
    tasks: Arc<InMemoryTaskStore>,
    checkpoints: Arc<InMemoryCheckpointStore>,
    journal: Arc<InMemoryEffectJournal>,
}

impl Stores {
    fn new() -> Self {
        Self {
            tasks: Arc::new(InMemoryTaskStore::new()),
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
            journal: Arc::new(InMemoryEffectJournal::new()),
        }
    }

    fn builder(&self, config: SchedulerConfig) -> SchedulerBuilder {
        SchedulerBuilder::new()
            .config(config)
            .task_store(self.tasks.clone())
            .checkpoint_store(self.checkpoints.clone())
            .effect_journal(self.journal.clone())
    }

    fn counters(&self, config: SchedulerConfig) -> Scheduler {
        self.builder(config)
            .register::<Counter, _>(CounterHandler)
            .unwrap()
            .build()
            .unwrap()
    }
}

/// `budget` one-unit steps per quantum, no safety margin.
fn config(budget: u64) -> SchedulerConfig {
    SchedulerConfig {
        budget_per_quantum: budget,
        step_cost: 1,
        safety_margin: 0,
        ..SchedulerConfig::default()
    }
}

fn retrying(budget: u64, max_retries: u32) -> SchedulerConfig {
    SchedulerConfig {
        retry: RetryPolicy {
            max_retries,
            backoff_base_quanta: 0,
            ..RetryPolicy::default()
        },
        ..config(budget)
    }
}

/// The `n` values a counter task has emitted, in step order.
async fn counted(scheduler: &Scheduler, id: TaskId) -> Vec<u64> {
    scheduler
        .effects(id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.payload["n"].as_u64().unwrap())
        .collect()
}

// ---- scenarios ----

#[tokio::test]
async fn budget_of_two_runs_one_step_of_each_task() {
    let stores = Stores::new();
    let mut scheduler = stores.counters(config(2));
    let a = scheduler.submit_task(&Counter::up_to(3), Priority::NORMAL).await.unwrap();
    let b = scheduler.submit_task(&Counter::up_to(1), Priority::NORMAL).await.unwrap();

    let report = scheduler.run_quantum().await;
    assert_eq!(report.steps_run, 2);
    assert_eq!(report.cost_consumed, 2);
    assert_eq!(report.completed, vec![b]);
    assert_eq!(report.suspended, vec![a]);
    assert!(report.exhausted);
    assert_eq!(scheduler.status(a).await.unwrap(), TaskStatus::Suspended);
    assert_eq!(scheduler.status(b).await.unwrap(), TaskStatus::Completed);
    assert_eq!(counted(&scheduler, a).await, vec![1]);

    let report = scheduler.run_quantum().await;
    assert_eq!(report.completed, vec![a]);
    assert!(!report.exhausted);
    assert_eq!(counted(&scheduler, a).await, vec![1, 2, 3]);
    assert_eq!(counted(&scheduler, b).await, vec![1]);
}

#[tokio::test]
async fn two_recoverable_failures_then_success_completes_on_third_attempt() {
    let stores = Stores::new();
    let calls = Arc::new(AtomicU32::new(0));
    let mut scheduler = stores
        .builder(retrying(10, 3))
        .register::<Flaky, _>(FlakyHandler {
            failures: 2,
            calls: calls.clone(),
        })
        .unwrap()
        .build()
        .unwrap();
    let id = scheduler
        .submit_task(&Flaky { label: "x".into() }, Priority::NORMAL)
        .await
        .unwrap();

    let reports = scheduler.run_until_settled(10).await.unwrap();

    let record = scheduler.get(id).await.unwrap();
    assert_eq!(record.status, TaskStatus::Completed);
    assert_eq!(record.retry_count, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0].suspended, vec![id]);
    assert_eq!(reports[1].suspended, vec![id]);
    assert_eq!(reports[2].completed, vec![id]);
    assert_eq!(scheduler.effects(id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn retry_limit_fails_task_with_last_error() {
    let stores = Stores::new();
    let calls = Arc::new(AtomicU32::new(0));
    let mut scheduler = stores
        .builder(retrying(10, 2))
        .register::<Flaky, _>(FlakyHandler {
            failures: u32::MAX,
            calls: calls.clone(),
        })
        .unwrap()
        .build()
        .unwrap();
    let id = scheduler
        .submit_task(&Flaky { label: "x".into() }, Priority::NORMAL)
        .await
        .unwrap();

    scheduler.run_until_settled(10).await.unwrap();

    let record = scheduler.get(id).await.unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(
        record.failure,
        Some(FailureReason::RetriesExhausted("transient failure 2".into()))
    );
    assert_eq!(record.last_error.as_deref(), Some("transient failure 2"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn per_task_retry_limit_overrides_policy() {
    let stores = Stores::new();
    let calls = Arc::new(AtomicU32::new(0));
    let mut scheduler = stores
        .builder(retrying(10, 5))
        .register::<Flaky, _>(FlakyHandler {
            failures: u32::MAX,
            calls: calls.clone(),
        })
        .unwrap()
        .build()
        .unwrap();
    let descriptor = TaskDescriptor::new(Flaky::TYPE, serde_json::json!({"label": "x"}))
        .with_max_retries(1);
    let id = scheduler.submit(descriptor).await.unwrap();

    scheduler.run_until_settled(10).await.unwrap();

    assert_eq!(scheduler.status(id).await.unwrap(), TaskStatus::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn backoff_keeps_task_out_until_gate() {
    let stores = Stores::new();
    let calls = Arc::new(AtomicU32::new(0));
    let policy = RetryPolicy {
        max_retries: 3,
        backoff_base_quanta: 2,
        ..RetryPolicy::default()
    };
    let mut scheduler = stores
        .builder(SchedulerConfig {
            retry: policy,
            ..config(10)
        })
        .register::<Flaky, _>(FlakyHandler {
            failures: 1,
            calls: calls.clone(),
        })
        .unwrap()
        .build()
        .unwrap();
    let id = scheduler
        .submit_task(&Flaky { label: "x".into() }, Priority::NORMAL)
        .await
        .unwrap();

    // Fails in quantum 1; gate is 1 + 1 + 2 = 4.
    scheduler.run_quantum().await;
    assert_eq!(scheduler.get(id).await.unwrap().not_before, Some(4));
    assert_eq!(scheduler.run_quantum().await.steps_run, 0);
    assert_eq!(scheduler.run_quantum().await.steps_run, 0);

    let report = scheduler.run_quantum().await;
    assert_eq!(report.quantum, 4);
    assert_eq!(report.completed, vec![id]);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cancelled_suspended_task_is_never_stepped_again() {
    let stores = Stores::new();
    let calls = Arc::new(AtomicU32::new(0));
    let mut scheduler = stores
        .builder(config(2))
        .register::<Counter, _>(Counted {
            inner: CounterHandler,
            calls: calls.clone(),
        })
        .unwrap()
        .build()
        .unwrap();
    let id = scheduler.submit_task(&Counter::up_to(10), Priority::NORMAL).await.unwrap();

    scheduler.run_quantum().await;
    assert_eq!(scheduler.status(id).await.unwrap(), TaskStatus::Suspended);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert_eq!(scheduler.cancel(id).await.unwrap(), CancelOutcome::Cancelled);
    let record = scheduler.get(id).await.unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert_eq!(record.failure, Some(FailureReason::Cancelled));

    for _ in 0..3 {
        assert_eq!(scheduler.run_quantum().await.steps_run, 0);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn cancelling_an_interrupted_running_task_takes_effect_next_quantum() {
    let stores = Stores::new();
    let calls = Arc::new(AtomicU32::new(0));
    let build = |journal: Arc<dyn EffectJournal>| {
        stores
            .builder(config(4))
            .effect_journal(journal)
            .register::<Counter, _>(Counted {
                inner: CounterHandler,
                calls: calls.clone(),
            })
            .unwrap()
            .build()
            .unwrap()
    };

    let cut: Arc<dyn EffectJournal> = Arc::new(CutJournal {
        inner: stores.journal.clone(),
        trip: Tripwire::after(1),
    });
    let mut first = build(cut);
    let id = first.submit_task(&Counter::up_to(3), Priority::NORMAL).await.unwrap();
    assert!(timeout(Duration::from_secs(1), first.run_quantum()).await.is_err());
    drop(first);

    let intact: Arc<dyn EffectJournal> = stores.journal.clone();
    let mut second = build(intact);
    assert_eq!(second.status(id).await.unwrap(), TaskStatus::Running);
    assert_eq!(second.cancel(id).await.unwrap(), CancelOutcome::Deferred);

    let report = second.run_quantum().await;
    assert_eq!(report.recovered, vec![id]);
    assert_eq!(report.failed, vec![id]);
    assert_eq!(report.steps_run, 0);
    assert_eq!(second.get(id).await.unwrap().failure, Some(FailureReason::Cancelled));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn quantum_never_spends_past_budget_minus_margin() {
    let stores = Stores::new();
    let mut scheduler = stores.counters(SchedulerConfig {
        budget_per_quantum: 10,
        safety_margin: 3,
        ..config(10)
    });
    for _ in 0..5 {
        scheduler.submit_task(&Counter::up_to(100), Priority::NORMAL).await.unwrap();
    }

    for _ in 0..5 {
        let report = scheduler.run_quantum().await;
        assert_eq!(report.steps_run, 7);
        assert!(report.cost_consumed <= 10 - 3);
        assert!(report.exhausted);
    }
}

#[tokio::test]
async fn step_reported_cost_is_charged() {
    let stores = Stores::new();
    let mut scheduler = stores
        .builder(config(6))
        .register::<Counter, _>(PricedCounter(3))
        .unwrap()
        .build()
        .unwrap();
    let id = scheduler.submit_task(&Counter::up_to(10), Priority::NORMAL).await.unwrap();

    let report = scheduler.run_quantum().await;
    assert_eq!(report.steps_run, 2);
    assert_eq!(report.cost_consumed, 6);
    assert_eq!(report.suspended, vec![id]);
}

#[tokio::test]
async fn step_reported_cost_never_overruns_the_budget() {
    let stores = Stores::new();
    let mut scheduler = stores
        .builder(config(7))
        .register::<Counter, _>(PricedCounter(3))
        .unwrap()
        .build()
        .unwrap();
    let id = scheduler.submit_task(&Counter::up_to(10), Priority::NORMAL).await.unwrap();

    for _ in 0..3 {
        let report = scheduler.run_quantum().await;
        assert_eq!(report.steps_run, 2);
        assert_eq!(report.cost_consumed, 6);
        assert!(report.exhausted);
    }
    assert_eq!(counted(&scheduler, id).await, vec![1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn host_budget_signal_gates_steps() {
    let stores = Stores::new();
    let host = Arc::new(AtomicU64::new(0));
    let view = host.clone();
    let mut scheduler = stores
        .builder(config(100))
        .budget_signal(Arc::new(move || view.load(Ordering::SeqCst)))
        .register::<Counter, _>(CounterHandler)
        .unwrap()
        .build()
        .unwrap();
    let id = scheduler.submit_task(&Counter::up_to(2), Priority::NORMAL).await.unwrap();

    let report = scheduler.run_quantum().await;
    assert_eq!(report.steps_run, 0);
    assert!(report.exhausted);
    assert_eq!(scheduler.status(id).await.unwrap(), TaskStatus::Pending);

    host.store(50, Ordering::SeqCst);
    assert_eq!(scheduler.run_quantum().await.completed, vec![id]);
}

#[tokio::test]
async fn higher_priority_runs_first() {
    let stores = Stores::new();
    let mut scheduler = stores.counters(config(1));
    let low = scheduler.submit_task(&Counter::up_to(1), Priority::LOW).await.unwrap();
    let high = scheduler.submit_task(&Counter::up_to(1), Priority::HIGH).await.unwrap();

    assert_eq!(scheduler.run_quantum().await.completed, vec![high]);
    assert_eq!(scheduler.run_quantum().await.completed, vec![low]);
}

#[tokio::test]
async fn slice_gives_consecutive_steps_per_pass() {
    let stores = Stores::new();
    let mut scheduler = stores.counters(SchedulerConfig {
        slice_steps: 2,
        ..config(4)
    });
    let a = scheduler.submit_task(&Counter::up_to(5), Priority::NORMAL).await.unwrap();
    let b = scheduler.submit_task(&Counter::up_to(5), Priority::NORMAL).await.unwrap();

    scheduler.run_quantum().await;
    assert_eq!(counted(&scheduler, a).await, vec![1, 2]);
    assert_eq!(counted(&scheduler, b).await, vec![1, 2]);
}

#[tokio::test]
async fn long_task_is_not_starved_by_a_stream_of_short_ones() {
    let stores = Stores::new();
    let mut scheduler = stores.counters(config(1));
    let long = scheduler.submit_task(&Counter::up_to(3), Priority::NORMAL).await.unwrap();

    let mut shorts = Vec::new();
    for _ in 0..10 {
        shorts.push(scheduler.submit_task(&Counter::up_to(1), Priority::NORMAL).await.unwrap());
        scheduler.run_quantum().await;
    }

    assert_eq!(scheduler.status(long).await.unwrap(), TaskStatus::Completed);
    // The earliest short tasks were served too, in submission order.
    assert_eq!(scheduler.status(shorts[0]).await.unwrap(), TaskStatus::Completed);
    assert_eq!(scheduler.status(shorts[1]).await.unwrap(), TaskStatus::Completed);
}

#[tokio::test]
async fn terminal_tasks_are_immutable() {
    let stores = Stores::new();
    let mut scheduler = stores.counters(config(10));
    let id = scheduler.submit_task(&Counter::up_to(2), Priority::NORMAL).await.unwrap();
    scheduler.run_quantum().await;

    let before = scheduler.get(id).await.unwrap();
    assert_eq!(before.status, TaskStatus::Completed);
    assert!(matches!(
        scheduler.cancel(id).await,
        Err(CancelError::AlreadyTerminal { status: TaskStatus::Completed, .. })
    ));
    for _ in 0..3 {
        assert_eq!(scheduler.run_quantum().await.steps_run, 0);
    }
    assert_eq!(scheduler.get(id).await.unwrap(), before);
    assert_eq!(counted(&scheduler, id).await, vec![1, 2]);
}

#[tokio::test]
async fn unknown_task_type_is_rejected_at_submit() {
    let scheduler = Stores::new().counters(config(10));
    let result = scheduler
        .submit(TaskDescriptor::new("test.nobody.v1", serde_json::json!({})))
        .await;
    assert!(matches!(result, Err(SchedulerError::UnknownTaskType(t)) if t.as_str() == "test.nobody.v1"));
}

#[tokio::test]
async fn task_without_handler_after_restart_fails() {
    let stores = Stores::new();
    let id = stores
        .counters(config(10))
        .submit_task(&Counter::up_to(2), Priority::NORMAL)
        .await
        .unwrap();

    let mut bare = stores.builder(config(10)).build().unwrap();
    let report = bare.run_quantum().await;

    assert_eq!(report.failed, vec![id]);
    assert_eq!(
        bare.get(id).await.unwrap().failure,
        Some(FailureReason::MissingHandler(TaskType::new(Counter::TYPE)))
    );
}

#[tokio::test]
async fn unrecoverable_error_fails_immediately() {
    let stores = Stores::new();
    let mut scheduler = stores
        .builder(retrying(10, 5))
        .register::<Doomed, _>(FatalHandler)
        .unwrap()
        .build()
        .unwrap();
    let id = scheduler
        .submit_task(&Doomed { why: "bad input".into() }, Priority::NORMAL)
        .await
        .unwrap();

    let report = scheduler.run_quantum().await;
    assert_eq!(report.failed, vec![id]);

    let record = scheduler.get(id).await.unwrap();
    assert_eq!(record.failure, Some(FailureReason::Unrecoverable("bad input".into())));
    assert_eq!(record.retry_count, 0);
}

#[tokio::test]
async fn panicking_step_fails_only_its_task() {
    let stores = Stores::new();
    let mut scheduler = stores
        .builder(config(10))
        .register::<Doomed, _>(PanickingHandler)
        .unwrap()
        .register::<Counter, _>(CounterHandler)
        .unwrap()
        .build()
        .unwrap();
    let doomed = scheduler
        .submit_task(&Doomed { why: String::new() }, Priority::NORMAL)
        .await
        .unwrap();
    let fine = scheduler.submit_task(&Counter::up_to(2), Priority::NORMAL).await.unwrap();

    let report = scheduler.run_quantum().await;
    assert_eq!(report.failed, vec![doomed]);
    assert_eq!(report.completed, vec![fine]);
    assert_eq!(
        scheduler.get(doomed).await.unwrap().failure,
        Some(FailureReason::Panicked("kaboom".into()))
    );
}

#[tokio::test]
async fn checkpoint_from_newer_version_fails_task() {
    let stores = Stores::new();
    let mut scheduler = stores.counters(config(10));
    let id = scheduler.submit_task(&Counter::up_to(2), Priority::NORMAL).await.unwrap();
    stores
        .checkpoints
        .save(id, &EncodedCheckpoint::new(CHECKPOINT_VERSION + 1, b"{}".to_vec()))
        .await
        .unwrap();

    let report = scheduler.run_quantum().await;
    assert_eq!(report.failed, vec![id]);
    assert!(matches!(
        scheduler.get(id).await.unwrap().failure,
        Some(FailureReason::CorruptCheckpoint(msg)) if msg.contains("unsupported checkpoint version")
    ));
}

#[tokio::test]
async fn failed_checkpoint_save_retries_from_last_durable_checkpoint() {
    let stores = Stores::new();
    let mut scheduler = stores
        .builder(retrying(10, 2))
        .checkpoint_store(Arc::new(ReadOnlyCheckpoints(InMemoryCheckpointStore::new())))
        .register::<Counter, _>(CounterHandler)
        .unwrap()
        .build()
        .unwrap();
    let id = scheduler.submit_task(&Counter::up_to(3), Priority::NORMAL).await.unwrap();

    let report = scheduler.run_quantum().await;
    assert_eq!(report.suspended, vec![id]);
    let record = scheduler.get(id).await.unwrap();
    assert_eq!(record.retry_count, 1);
    assert!(record.last_error.unwrap().contains("persistence failure"));
    assert_eq!(record.cursor, None);

    // The retry re-runs step 0; its effects are not committed twice.
    scheduler.run_until_settled(10).await.unwrap();
    assert_eq!(scheduler.status(id).await.unwrap(), TaskStatus::Failed);
    assert_eq!(counted(&scheduler, id).await, vec![1]);
}

#[tokio::test]
async fn many_tasks_eventually_complete() {
    let stores = Stores::new();
    let calls = Arc::new(AtomicU32::new(0));
    let mut scheduler = stores
        .builder(retrying(3, 3))
        .register::<Counter, _>(CounterHandler)
        .unwrap()
        .register::<Flaky, _>(FlakyHandler { failures: 1, calls })
        .unwrap()
        .build()
        .unwrap();

    let mut ids = Vec::new();
    for to in 1..=10 {
        let priority = if to % 3 == 0 { Priority::HIGH } else { Priority::NORMAL };
        ids.push(scheduler.submit_task(&Counter::up_to(to), priority).await.unwrap());
    }
    let flaky = scheduler
        .submit_task(&Flaky { label: "once".into() }, Priority::LOW)
        .await
        .unwrap();

    scheduler.run_until_settled(200).await.unwrap();

    let counts = scheduler.counts().await.unwrap();
    assert_eq!(counts.completed, 11);
    assert_eq!(counts.outstanding(), 0);
    for (i, id) in ids.iter().enumerate() {
        let expected: Vec<u64> = (1..=i as u64 + 1).collect();
        assert_eq!(counted(&scheduler, *id).await, expected);
    }
    assert_eq!(scheduler.status(flaky).await.unwrap(), TaskStatus::Completed);
}

#[tokio::test]
async fn purge_drops_record_checkpoint_and_effects() {
    let stores = Stores::new();
    let mut scheduler = stores.counters(SchedulerConfig {
        retain_checkpoints: true,
        ..config(10)
    });
    let id = scheduler.submit_task(&Counter::up_to(2), Priority::NORMAL).await.unwrap();
    let live = scheduler.submit_task(&Counter::up_to(50), Priority::LOW).await.unwrap();
    scheduler.run_quantum().await;

    assert!(stores.checkpoints.load(id).await.unwrap().is_some());
    assert!(matches!(
        scheduler.purge(live).await,
        Err(SchedulerError::NotTerminal { .. })
    ));

    scheduler.purge(id).await.unwrap();
    assert!(matches!(scheduler.get(id).await, Err(SchedulerError::NotFound(_))));
    assert!(stores.checkpoints.load(id).await.unwrap().is_none());
    assert!(scheduler.effects(id).await.unwrap().is_empty());
    assert!(matches!(
        scheduler
            .submit(TaskDescriptor::new(Counter::TYPE, serde_json::json!({"next": 1, "to": 1})).with_id(id))
            .await,
        Err(SchedulerError::DuplicateTask(_))
    ));
}

#[tokio::test]
async fn completed_checkpoint_is_cleared_unless_retained() {
    let stores = Stores::new();
    let mut scheduler = stores.counters(config(10));
    let id = scheduler.submit_task(&Counter::up_to(2), Priority::NORMAL).await.unwrap();
    scheduler.run_quantum().await;

    let record = scheduler.get(id).await.unwrap();
    assert_eq!(record.cursor, Some(StepCursor(2)));
    assert!(stores.checkpoints.load(id).await.unwrap().is_none());
}

#[rstest]
#[case(Cut::AfterCommit, 1)]
#[case(Cut::AfterCommit, 2)]
#[case(Cut::AfterCommit, 3)]
#[case(Cut::AfterCommit, 4)]
#[case(Cut::AfterCommit, 5)]
#[case(Cut::AfterSave, 1)]
#[case(Cut::AfterSave, 2)]
#[case(Cut::AfterSave, 3)]
#[tokio::test(start_paused = true)]
async fn effects_apply_once_whatever_the_cut_point(#[case] cut: Cut, #[case] at: usize) {
    let stores = Stores::new();
    let (journal, checkpoints): (Arc<dyn EffectJournal>, Arc<dyn CheckpointStore>) = match cut {
        Cut::AfterCommit => (
            Arc::new(CutJournal {
                inner: stores.journal.clone(),
                trip: Tripwire::after(at),
            }),
            stores.checkpoints.clone(),
        ),
        Cut::AfterSave => (
            stores.journal.clone(),
            Arc::new(CutCheckpoints {
                inner: stores.checkpoints.clone(),
                trip: Tripwire::after(at),
            }),
        ),
    };
    let mut interrupted = stores
        .builder(config(4))
        .effect_journal(journal)
        .checkpoint_store(checkpoints)
        .register::<Counter, _>(CounterHandler)
        .unwrap()
        .build()
        .unwrap();
    let a = interrupted.submit_task(&Counter::up_to(3), Priority::NORMAL).await.unwrap();
    let b = interrupted.submit_task(&Counter::up_to(2), Priority::NORMAL).await.unwrap();

    let mut cut_off = false;
    for _ in 0..10 {
        if timeout(Duration::from_secs(1), interrupted.run_quantum()).await.is_err() {
            cut_off = true;
            break;
        }
    }
    assert!(cut_off, "tripwire never fired");
    drop(interrupted);

    let mut resumed = stores.counters(config(4));
    resumed.run_until_settled(20).await.unwrap();

    assert_eq!(resumed.status(a).await.unwrap(), TaskStatus::Completed);
    assert_eq!(resumed.status(b).await.unwrap(), TaskStatus::Completed);
    assert_eq!(counted(&resumed, a).await, vec![1, 2, 3]);
    assert_eq!(counted(&resumed, b).await, vec![1, 2]);
}

#[tokio::test]
async fn file_backed_scheduler_resumes_after_restart() {
    let dir = TempDir::new().unwrap();
    let build = |stores: FileStores| {
        SchedulerBuilder::new()
            .config(config(2))
            .file_stores(stores)
            .register::<Counter, _>(CounterHandler)
            .unwrap()
            .build()
            .unwrap()
    };

    let id = {
        let mut scheduler = build(FileStores::open(dir.path()).await.unwrap());
        let id = scheduler.submit_task(&Counter::up_to(4), Priority::NORMAL).await.unwrap();
        let report = scheduler.run_quantum().await;
        assert_eq!(report.suspended, vec![id]);
        id
    };

    let stores = FileStores::open(dir.path()).await.unwrap();
    let checkpoints = stores.checkpoints.clone();
    let mut scheduler = build(stores);
    let record = scheduler.get(id).await.unwrap();
    assert_eq!(record.status, TaskStatus::Suspended);
    assert_eq!(record.cursor, Some(StepCursor(2)));

    let reports = scheduler.run_until_settled(10).await.unwrap();
    assert_eq!(reports[0].quantum, 2);
    assert_eq!(scheduler.status(id).await.unwrap(), TaskStatus::Completed);
    assert_eq!(counted(&scheduler, id).await, vec![1, 2, 3, 4]);
    assert!(checkpoints.load(id).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn file_backed_cut_off_resumes_without_duplicate_effects() {
    let dir = TempDir::new().unwrap();

    let (a, b) = {
        let stores = FileStores::open(dir.path()).await.unwrap();
        let mut scheduler = SchedulerBuilder::new()
            .config(config(10))
            .file_stores(stores)
            .register::<Counter, _>(CounterHandler)
            .unwrap()
            .build()
            .unwrap();
        let a = scheduler.submit_task(&Counter::up_to(3), Priority::NORMAL).await.unwrap();
        let b = scheduler.submit_task(&Counter::up_to(3), Priority::NORMAL).await.unwrap();
        (a, b)
    };

    {
        let stores = FileStores::open(dir.path()).await.unwrap();
        let journal = Arc::new(CutJournal {
            inner: stores.journal.clone(),
            trip: Tripwire::after(3),
        });
        let mut scheduler = SchedulerBuilder::new()
            .config(config(10))
            .file_stores(stores)
            .effect_journal(journal)
            .register::<Counter, _>(CounterHandler)
            .unwrap()
            .build()
            .unwrap();
        assert!(timeout(Duration::from_secs(1), scheduler.run_quantum()).await.is_err());
    }

    let mut scheduler = SchedulerBuilder::new()
        .config(config(10))
        .file_stores(FileStores::open(dir.path()).await.unwrap())
        .register::<Counter, _>(CounterHandler)
        .unwrap()
        .build()
        .unwrap();
    let report = scheduler.run_quantum().await;
    assert_eq!(report.recovered.len(), 2);

    scheduler.run_until_settled(10).await.unwrap();
    assert_eq!(counted(&scheduler, a).await, vec![1, 2, 3]);
    assert_eq!(counted(&scheduler, b).await, vec![1, 2, 3]);
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(4)]
#[case(8)]
#[case(16)]
#[case(32)]
#[case(64)]
#[tokio::test]
async fn file_backed_quantum_dropped_mid_write_applies_effects_once(#[case] polls: usize) {
    let dir = TempDir::new().unwrap();
    let stores = FileStores::open(dir.path()).await.unwrap();
    let build = || {
        SchedulerBuilder::new()
            .config(config(10))
            .task_store(stores.tasks.clone())
            .checkpoint_store(stores.checkpoints.clone())
            .effect_journal(stores.journal.clone())
            .register::<Counter, _>(CounterHandler)
            .unwrap()
            .build()
            .unwrap()
    };

    let mut interrupted = build();
    let a = interrupted.submit_task(&Counter::up_to(3), Priority::NORMAL).await.unwrap();
    let b = interrupted.submit_task(&Counter::up_to(2), Priority::NORMAL).await.unwrap();
    {
        let mut quantum = std::pin::pin!(interrupted.run_quantum());
        for _ in 0..polls {
            if futures::poll!(quantum.as_mut()).is_ready() {
                break;
            }
            tokio::task::yield_now().await;
        }
    }
    drop(interrupted);

    let mut resumed = build();
    resumed.run_until_settled(20).await.unwrap();
    assert_eq!(resumed.status(a).await.unwrap(), TaskStatus::Completed);
    assert_eq!(resumed.status(b).await.unwrap(), TaskStatus::Completed);
    assert_eq!(counted(&resumed, a).await, vec![1, 2, 3]);
    assert_eq!(counted(&resumed, b).await, vec![1, 2]);

    let reopened = SchedulerBuilder::new()
        .file_stores(FileStores::open(dir.path()).await.unwrap())
        .register::<Counter, _>(CounterHandler)
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(reopened.status(a).await.unwrap(), TaskStatus::Completed);
    assert_eq!(counted(&reopened, a).await, vec![1, 2, 3]);
    assert_eq!(counted(&reopened, b).await, vec![1, 2]);
}
