//! tickwork - a host simulator for the scheduler.
//!
//! Every invocation is one host tick (or several with `run --ticks`): the
//! process opens the state directory, does its work and exits, so nothing
//! survives between ticks except what the stores made durable.

mod demo;

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tickwork_core::impls::FileStores;
use tickwork_core::{
    Priority, Scheduler, SchedulerBuilder, SchedulerConfig, Task, TaskDescriptor, TaskId,
    TaskStatus,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::demo::{Countdown, CountdownHandler, Flaky, FlakyHandler};

#[derive(Parser)]
#[command(name = "tickwork")]
#[command(about = "Drive a budget-limited task scheduler one quantum at a time", long_about = None)]
struct Cli {
    /// Directory holding tasks, checkpoints and the effect journal
    #[arg(long, global = true, default_value = ".tickwork")]
    state_dir: PathBuf,

    /// JSON scheduler config (TICKWORK_* variables override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a task
    Submit {
        /// Task type, e.g. demo.countdown.v1
        kind: String,

        /// Initial task state (JSON)
        #[arg(long, default_value = "{}")]
        input: String,

        /// Lower runs first (0 = high, 100 = normal, 200 = low)
        #[arg(long, default_value_t = Priority::NORMAL.0)]
        priority: u8,

        /// Caller-chosen task id
        #[arg(long)]
        id: Option<String>,

        /// Override the configured retry limit
        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Run quanta
    Run {
        #[arg(long, default_value_t = 1)]
        ticks: u64,

        /// Stop early once no task is outstanding
        #[arg(long)]
        until_idle: bool,
    },

    /// List tasks in scheduling order
    List {
        #[arg(short, long)]
        status: Option<TaskStatus>,
    },

    /// Show one task record
    Status { id: String },

    /// Cancel a task
    Cancel { id: String },

    /// Remove a terminal task with its checkpoint and effects
    Purge { id: String },

    /// Print the effects a task committed
    Effects { id: String },

    /// Count tasks per status
    Counts,

    /// List the task types this host can run
    Types,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tickwork=info,tickwork_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // One logical thread of control.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli))
}

fn load_config(path: Option<&PathBuf>) -> Result<SchedulerConfig> {
    let config = match path {
        Some(path) => SchedulerConfig::from_json_file(path)?,
        None => SchedulerConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

async fn open_scheduler(cli: &Cli) -> Result<Scheduler> {
    let config = load_config(cli.config.as_ref())?;
    let stores = FileStores::open(&cli.state_dir)
        .await
        .with_context(|| format!("opening state directory {}", cli.state_dir.display()))?;
    tracing::info!(
        state_dir = %cli.state_dir.display(),
        budget = config.budget_per_quantum,
        "state directory opened"
    );

    let scheduler = SchedulerBuilder::new()
        .config(config)
        .file_stores(stores)
        .register::<Countdown, _>(CountdownHandler)?
        .register::<Flaky, _>(FlakyHandler)?
        .expect_tasks(&[Countdown::TYPE, Flaky::TYPE])
        .build()?;
    Ok(scheduler)
}

fn parse_id(raw: &str) -> Result<TaskId> {
    TaskId::from_str(raw).with_context(|| format!("invalid task id '{raw}'"))
}

async fn run(cli: Cli) -> Result<()> {
    let mut scheduler = open_scheduler(&cli).await?;

    match cli.command {
        Commands::Submit {
            kind,
            input,
            priority,
            id,
            max_retries,
        } => {
            let input: serde_json::Value =
                serde_json::from_str(&input).context("--input is not valid JSON")?;
            let mut descriptor =
                TaskDescriptor::new(kind, input).with_priority(Priority(priority));
            if let Some(id) = id {
                descriptor = descriptor.with_id(parse_id(&id)?);
            }
            if let Some(max_retries) = max_retries {
                descriptor = descriptor.with_max_retries(max_retries);
            }
            let id = scheduler.submit(descriptor).await?;
            tracing::debug!(task_id = %id, "task submitted");
            println!("{id}");
        }
        Commands::Run { ticks, until_idle } => {
            for tick in 1..=ticks {
                if until_idle && scheduler.counts().await?.outstanding() == 0 {
                    tracing::info!(tick, "no outstanding tasks, stopping");
                    break;
                }
                let report = scheduler.run_quantum().await;
                if let Some(reason) = &report.aborted {
                    tracing::warn!(tick, quantum = report.quantum, %reason, "quantum aborted");
                }
                println!("{}", serde_json::to_string(&report)?);
            }
        }
        Commands::List { status } => {
            for task in scheduler.list(status).await? {
                let cursor = task.cursor.map(|c| c.to_string()).unwrap_or_else(|| "-".into());
                println!(
                    "{}  {:<9}  p={:<3}  cursor={:<4}  retries={}  {}",
                    task.id, task.status, task.priority, cursor, task.retry_count, task.kind
                );
            }
        }
        Commands::Status { id } => {
            let record = scheduler.get(parse_id(&id)?).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Cancel { id } => {
            let outcome = scheduler.cancel(parse_id(&id)?).await?;
            println!("{outcome:?}");
        }
        Commands::Purge { id } => {
            let record = scheduler.purge(parse_id(&id)?).await?;
            println!("purged {} ({})", record.id, record.status);
        }
        Commands::Effects { id } => {
            for effect in scheduler.effects(parse_id(&id)?).await? {
                println!("{}", serde_json::to_string(&effect)?);
            }
        }
        Commands::Counts => {
            println!("{}", serde_json::to_string(&scheduler.counts().await?)?);
        }
        Commands::Types => {
            for kind in [Countdown::TYPE, Flaky::TYPE] {
                println!("{kind}");
            }
        }
    }
    Ok(())
}
