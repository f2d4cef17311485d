use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use database::SqliteDispatchStore;
use dispatch_core::{
    pipeline::PipelineConfig,
    repository::{AgentStore, TaskStore},
    InProcessEventBus,
};
use dispatch_server::{
    config::Config,
    notify::{LoggingAgentNotifier, LoggingRoleNotifier},
    telemetry::{init_telemetry, log_startup_info},
};
use scheduler::{KeyedLocks, Reaper, Scheduler, StoreDistributor};

#[derive(Parser)]
#[command(name = "dispatchd")]
#[command(about = "Multi-agent work dispatcher daemon")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CONFIG_FILE")]
    config: Option<String>,

    /// Database URL override
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Log level override
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(config_file) => Config::from_file(config_file)?,
        None => Config::from_env()?,
    };

    if let Some(ref database_url) = cli.database_url {
        config.database.url = Some(database_url.clone());
    }

    if let Some(ref log_level) = cli.log_level {
        config.logging.level = log_level.clone();
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let config = load_config(&cli).context("Failed to load configuration")?;

    init_telemetry(&config.logging).context("Failed to initialize telemetry")?;

    if let Err(e) = config.validate() {
        error!(error = %e, "Configuration validation failed");
        std::process::exit(1);
    }

    log_startup_info(&config);

    let store = SqliteDispatchStore::new(&config.database_url())
        .await
        .context("Failed to open database")?;
    store.migrate().await.context("Failed to run migrations")?;
    let store = Arc::new(store);

    let tasks: Arc<dyn TaskStore> = store.clone();
    let agents: Arc<dyn AgentStore> = store.clone();
    let bus = Arc::new(InProcessEventBus::new());
    let distributor = Arc::new(StoreDistributor::new(agents.clone()));

    let dispatcher = Scheduler::new(
        tasks,
        agents,
        distributor,
        Arc::new(LoggingAgentNotifier),
        Arc::new(LoggingRoleNotifier),
        bus,
        Arc::new(KeyedLocks::new()),
        PipelineConfig::standard(),
    );

    // The reaper outlives every request; it stops when the bus closes or
    // the process exits
    let reaper = Arc::new(Reaper::new(dispatcher, config.reaper_config()));
    let reaper_handle = reaper.spawn();

    let orphaned = reaper
        .scan_orphans()
        .await
        .context("Startup orphan scan failed")?;
    if orphaned > 0 {
        info!(orphaned, "recovering tasks from agents that died with the previous process");
    }

    info!("Dispatcher is ready");
    println!("dispatchd is ready (press Ctrl+C to shut down)");

    // Graceful shutdown on SIGINT/SIGTERM
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("Failed to register SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for ctrl+c")?;
        info!("Received Ctrl+C, shutting down");
    }

    reaper_handle.abort();
    info!("Dispatcher shut down cleanly");

    Ok(())
}
