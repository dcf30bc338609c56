//! SchedulerBuilder - wiring and startup validation.
//!
//! Stores default to in-memory ones; hand in file-backed stores (or your own
//! port implementations) for durability across process restarts.

use std::sync::Arc;

use super::config::SchedulerConfig;
use super::guard::IdempotencyGuard;
use super::ledger::CostLedger;
use super::registry::TaskRegistry;
use super::scheduler::Scheduler;
use crate::impls::{FileStores, InMemoryCheckpointStore, InMemoryEffectJournal, InMemoryTaskStore};
use crate::ports::{
    BudgetSignal, CheckpointStore, EffectJournal, IdGenerator, SystemClock, TaskStore,
    UlidGenerator,
};
use crate::typed::{DynHandler, Handler, HandlerRegistry, RegistryError, Task};

/// Builds a `Scheduler`.
///
/// # Example
/// ```ignore
/// let scheduler = SchedulerBuilder::new()
///     .config(config)
///     .file_stores(FileStores::open(state_dir).await?)
///     .register::<Invoice, _>(InvoiceHandler)?
///     .expect_tasks(&["billing.invoice.v1"])
///     .build()?;
/// ```
///
/// `expect_tasks` makes `build` fail when a task type that persisted tasks
/// rely on has no registered handler, instead of failing those tasks later.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    handlers: HandlerRegistry,
    expected_tasks: Option<Vec<String>>,
    task_store: Option<Arc<dyn TaskStore>>,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    journal: Option<Arc<dyn EffectJournal>>,
    id_generator: Option<Arc<dyn IdGenerator>>,
    budget_signal: Option<Arc<dyn BudgetSignal>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
            handlers: HandlerRegistry::new(),
            expected_tasks: None,
            task_store: None,
            checkpoint_store: None,
            journal: None,
            id_generator: None,
            budget_signal: None,
        }
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn task_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.task_store = Some(store);
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    pub fn effect_journal(mut self, journal: Arc<dyn EffectJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Use all three stores of one state directory.
    pub fn file_stores(self, stores: FileStores) -> Self {
        self.task_store(stores.tasks)
            .checkpoint_store(stores.checkpoints)
            .effect_journal(stores.journal)
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = Some(ids);
        self
    }

    /// Attach the host's own remaining-budget estimate.
    pub fn budget_signal(mut self, signal: Arc<dyn BudgetSignal>) -> Self {
        self.budget_signal = Some(signal);
        self
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.handlers.register::<T, H>(handler)?;
        Ok(self)
    }

    pub fn register_dyn(mut self, handler: Arc<dyn DynHandler>) -> Result<Self, RegistryError> {
        self.handlers.register_dyn(handler)?;
        Ok(self)
    }

    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<Scheduler, BuildError> {
        if let Some(expected_tasks) = &self.expected_tasks {
            let registered_types = self.handlers.registered_types();
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|t| !registered_types.contains(t))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }

        let task_store = self
            .task_store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));
        let checkpoint_store = self
            .checkpoint_store
            .unwrap_or_else(|| Arc::new(InMemoryCheckpointStore::new()));
        let journal = self
            .journal
            .unwrap_or_else(|| Arc::new(InMemoryEffectJournal::new()));
        let ids = self
            .id_generator
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(SystemClock)));

        let mut ledger = CostLedger::new(self.config.budget_per_quantum, self.config.safety_margin);
        if let Some(signal) = self.budget_signal {
            ledger = ledger.with_signal(signal);
        }

        tracing::debug!(
            task_types = ?self.handlers.registered_types(),
            budget = self.config.budget_per_quantum,
            "scheduler built"
        );
        Ok(Scheduler::from_parts(
            self.config,
            self.handlers,
            TaskRegistry::new(task_store, ids),
            checkpoint_store,
            IdempotencyGuard::new(journal),
            ledger,
        ))
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
