use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

mod alert;
mod config;
mod database;
mod logging;
mod models;
mod monitoring;
mod pool;

use alert::{LogAlerter, WebhookAlerter};
use config::Config;
use database::ProbeStore;
use monitoring::{AlertDispatcher, MonitorRegistry, ProbeExecutor, Scheduler};

#[derive(Debug, Parser)]
#[command(name = "uptimer", about = "Multi-target uptime-probing scheduler")]
struct Args {
    /// Path to the TOML config file (defaults to the XDG config directory)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let args = Args::parse();
    let config = Config::from_config(args.config.as_deref())?;
    info!("{config}");

    let pool = pool::build_pool(&config.database.path).await?;
    {
        let conn = pool.get().await.context("failed to get database connection")?;
        database::initialize_database(&conn).await?;
    }
    let store = Arc::new(ProbeStore::new_from_pool(pool));

    let alerter: Arc<dyn AlertDispatcher> = match &config.alert.webhook_url {
        Some(endpoint) => Arc::new(WebhookAlerter::new(endpoint.clone())?),
        None => Arc::new(LogAlerter),
    };

    let executor = Arc::new(ProbeExecutor::new(config.probe.timeout_seconds));
    let mut scheduler = Scheduler::new(executor, store.clone(), alerter);

    scheduler.start(store.as_ref()).await.context("failed to start monitoring")?;

    // The monitor CRUD surface lives outside this process; a periodic
    // registry reload stands in for its change notifications.
    let mut reload = interval(Duration::from_secs(config.scheduler.reload_interval_seconds));
    reload.set_missed_tick_behavior(MissedTickBehavior::Skip);
    reload.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = reload.tick() => {
                match store.list_monitors().await {
                    Ok(monitors) => {
                        if let Err(e) = scheduler.reconcile(monitors) {
                            warn!("reconciliation rejected: {e}");
                        }
                    }
                    Err(e) => warn!("failed to reload monitors, keeping current jobs: {e:#}"),
                }
            }
        }
    }

    info!("shutting down");
    scheduler.stop().await;
    Ok(())
}
