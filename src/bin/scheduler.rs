//! # Radar Scheduler
//!
//! Periodically enqueues one `rss_fetch` task per active RSS source.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use radar_core::agent::{AgentContext, StoreMode};
use radar_core::config::ConfigLoader;
use radar_core::scheduler::{PgSourceRepository, SourceScheduler};
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "radar-scheduler")]
#[command(about = "Schedule RSS fetch tasks for every active source")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (default: $RADAR_CONFIG_PATH or config/radar.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single scheduling pass and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    radar_core::logging::init_tracing();
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = cli.config {
        loader = loader.with_file(path);
    }
    let config = loader.load()?;
    let scheduler_config = config.scheduler.clone();

    let context = match AgentContext::bootstrap("scheduler", config, StoreMode::Required).await {
        Ok(context) => context,
        Err(e) => {
            error!(error = %e, "Scheduler failed to start");
            return Err(e.into());
        }
    };

    let Some(store) = context.store().cloned() else {
        anyhow::bail!("scheduler requires a store connection");
    };
    let scheduler = Arc::new(SourceScheduler::new(
        Arc::new(PgSourceRepository::new(store)),
        Arc::clone(context.publisher()),
        scheduler_config,
    ));

    if cli.once {
        let report = scheduler.schedule_once().await?;
        info!(?report, "Single pass finished");
        context.shutdown().await;
        return Ok(());
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let runner = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(stop_rx).await })
    };

    context.wait_for_shutdown_signal().await;
    let _ = stop_tx.send(true);
    if let Err(e) = runner.await {
        error!(error = %e, "Scheduler task ended abnormally");
    }
    context.shutdown().await;
    Ok(())
}
