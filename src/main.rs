//! prism-ce server entry point.
//!
//! Initializes logging, prepares the database and runs the compute engine
//! worker pool until interrupted.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use prism_ce::clock::SystemClock;
use prism_ce::config::QueueConfig;
use prism_ce::node::{EngineState, EngineStatusHolder, NodeInformation, UpgradeStatus};
use prism_ce::queue::{QueueCoordinator, QueueLifecycle, QueueStatusCounters};
use prism_ce::storage::{ActivityDao, ActivityQuery, Database, QueueDao, TaskStatus};
use prism_ce::worker::{NoopTaskProcessor, WorkerPool, WorkerPoolConfig};

/// Interval between worn-out claim sweeps.
const WORNOUT_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Compute engine task queue for the Prism analysis platform.
#[derive(Parser)]
#[command(name = "prism-ce")]
#[command(about = "Compute engine task queue for the Prism analysis platform")]
#[command(version)]
struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run the compute engine: migrate, clean up and start the worker pool.
    Serve(ServeArgs),

    /// Apply pending database migrations and exit.
    Migrate(DatabaseArgs),

    /// Print queue depth and history statistics as JSON.
    Status(DatabaseArgs),
}

/// Arguments for `prism-ce serve`.
#[derive(Parser)]
struct ServeArgs {
    #[command(flatten)]
    database: DatabaseArgs,

    /// Number of workers.
    #[arg(short, long, env = "CE_WORKER_COUNT", default_value = "2")]
    workers: usize,

    /// Seconds a worker sleeps between peeks when the queue is empty.
    #[arg(long, env = "CE_POLL_INTERVAL_SECONDS", default_value = "2")]
    poll_interval_seconds: u64,

    /// Allow PR/branch tasks of one project to run concurrently.
    #[arg(long, env = "CE_PARALLEL_PROJECT_TASKS_ENABLED")]
    parallel_project_tasks: bool,

    /// Seconds an in-progress claim may last before it is reaped.
    #[arg(long, env = "CE_WORNOUT_THRESHOLD_SECONDS", default_value = "7200")]
    wornout_threshold_seconds: u64,

    /// Name of this node, recorded on finished tasks.
    #[arg(long, env = "CE_NODE_NAME")]
    node_name: Option<String>,

    /// Treat this start as the first one after a server upgrade.
    #[arg(long)]
    upgraded: bool,
}

/// Database location arguments.
#[derive(Parser)]
struct DatabaseArgs {
    /// SQLite database URL.
    #[arg(short, long, env = "CE_DATABASE_URL", default_value = "sqlite://ce.db")]
    database_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > --log-level CLI arg > default "info"
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Migrate(args) => migrate(args).await,
        Commands::Status(args) => status(args).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = QueueConfig::new()
        .with_database_url(&args.database.database_url)
        .with_parallel_project_tasks(args.parallel_project_tasks)
        .with_wornout_threshold(Duration::from_secs(args.wornout_threshold_seconds))
        .with_worker_count(args.workers)
        .with_poll_interval(Duration::from_secs(args.poll_interval_seconds));
    config.validate()?;

    let db = Database::connect(&config.database_url).await?;
    db.run_migrations().await?;

    let node = match args.node_name {
        Some(name) => NodeInformation::named(name),
        None => NodeInformation::anonymous(),
    };
    let engine_status = Arc::new(EngineStatusHolder::new(EngineState::Starting));
    let coordinator = Arc::new(QueueCoordinator::new(
        db,
        &config,
        Arc::new(QueueStatusCounters::new()),
        Arc::clone(&engine_status),
        node,
        Arc::new(SystemClock),
    ));

    let lifecycle = Arc::new(QueueLifecycle::new(
        Arc::clone(&coordinator),
        UpgradeStatus::new(args.upgraded),
    ));
    lifecycle.initialize().await?;
    engine_status.set(EngineState::Started);

    let mut pool = WorkerPool::new(
        WorkerPoolConfig::from_queue_config(&config),
        Arc::clone(&coordinator),
        lifecycle,
        Arc::new(NoopTaskProcessor),
    );
    pool.start().await?;

    let sweeper = tokio::spawn({
        let coordinator = Arc::clone(&coordinator);
        async move {
            let mut ticker = tokio::time::interval(WORNOUT_SWEEP_INTERVAL);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                if let Err(e) = coordinator.cancel_wornouts().await {
                    error!(error = %e, "Worn-out sweep failed");
                }
            }
        }
    });

    info!("Compute engine started, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutdown requested");
    engine_status.set(EngineState::Stopping);
    sweeper.abort();
    pool.shutdown().await?;

    Ok(())
}

async fn migrate(args: DatabaseArgs) -> anyhow::Result<()> {
    let db = Database::connect(&args.database_url).await?;
    db.run_migrations().await?;
    info!("Migrations applied");
    Ok(())
}

async fn status(args: DatabaseArgs) -> anyhow::Result<()> {
    let db = Database::connect(&args.database_url).await?;
    db.run_migrations().await?;

    let queue_dao = QueueDao::new(Arc::new(SystemClock));
    let activity_dao = ActivityDao::new();

    let mut session = db.session().await?;
    let pending = queue_dao
        .count_by_status(&mut session, TaskStatus::Pending)
        .await?;
    let in_progress = queue_dao
        .count_by_status(&mut session, TaskStatus::InProgress)
        .await?;
    let finished = activity_dao
        .count_by_query(&mut session, &ActivityQuery::new())
        .await?;

    let report = json!({
        "pending": pending,
        "in_progress": in_progress,
        "finished": finished,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
