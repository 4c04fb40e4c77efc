use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use vanish::channels::{ChannelGateway, DiscordGateway};
use vanish::cli::{Cli, Command, run_policy_command};
use vanish::config::{Config, LogFormat};
use vanish::db::{PgStore, PolicyStore};
use vanish::sweep::{SweepCoordinator, SweepDeps, SweepScheduler, spawn_scheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    match cli.command {
        Command::Run => run_service(&config).await,
        Command::Sweep => sweep_once(&config).await,
        Command::Policy(cmd) => {
            let store = connect_store(&config).await?;
            let gateway = match &config.discord {
                Some(discord) => Some(DiscordGateway::new(discord)?),
                None => None,
            };
            run_policy_command(
                cmd,
                store.as_ref(),
                gateway.as_ref().map(|g| g as &dyn ChannelGateway),
            )
            .await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vanish=info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Connect to the policy store and bring the schema up to date.
///
/// The service cannot do anything useful without its store, so failure here
/// ends the process.
async fn connect_store(config: &Config) -> vanish::Result<Arc<PgStore>> {
    let store = PgStore::new(&config.database).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to connect to policy store");
        e
    })?;
    store.run_migrations().await?;
    Ok(Arc::new(store))
}

fn coordinator(config: &Config, store: Arc<PgStore>) -> vanish::Result<SweepCoordinator> {
    let gateway = Arc::new(DiscordGateway::new(config.discord()?)?);
    let store: Arc<dyn PolicyStore> = store;
    Ok(SweepCoordinator::new(
        SweepDeps::new(store, gateway),
        &config.sweep,
    ))
}

async fn run_service(config: &Config) -> anyhow::Result<()> {
    if !config.sweep.enabled {
        tracing::warn!("SWEEP_ENABLED is false, nothing to run");
        return Ok(());
    }

    let store = connect_store(config).await?;
    let coordinator = Arc::new(coordinator(config, store)?);
    let scheduler = spawn_scheduler(SweepScheduler::new(coordinator, &config.sweep));

    tracing::info!("Vanish is running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    scheduler.shutdown().await;
    Ok(())
}

async fn sweep_once(config: &Config) -> anyhow::Result<()> {
    let store = connect_store(config).await?;
    let summary = coordinator(config, store)?.run_once().await?;

    println!("Channels:  {}", summary.channels);
    println!("  completed: {}", summary.completed);
    println!("  skipped:   {}", summary.skipped);
    println!("  aborted:   {}", summary.aborted);
    println!("  failed:    {}", summary.failed);
    println!("Processed: {}", summary.processed);
    println!("Deleted:   {}", summary.deleted);
    println!("Errors:    {}", summary.errors);
    Ok(())
}
