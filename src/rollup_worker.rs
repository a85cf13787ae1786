// Background rollup worker: runs the scheduler on a cron expression (UTC) or
// every interval_secs, until shutdown.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{instrument, warn};

use crate::scheduler::RollupScheduler;

/// Config for the rollup worker.
#[derive(Debug, Clone)]
pub struct RollupWorkerConfig {
    /// Optional cron expression (e.g. "0 5 * * * *" = five past each hour).
    pub schedule: Option<String>,
    /// Run every N seconds when schedule is not set.
    pub interval_secs: u64,
}

/// Spawns the rollup worker. Returns a join handle.
pub fn spawn(
    scheduler: Arc<RollupScheduler>,
    config: RollupWorkerConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(scheduler, config, shutdown_rx).await;
    })
}

#[instrument(skip(scheduler, shutdown_rx), fields(interval_secs = config.interval_secs))]
async fn run(
    scheduler: Arc<RollupScheduler>,
    config: RollupWorkerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (tick_tx, mut tick_rx) = mpsc::channel::<()>(1);
    let timer = tokio::spawn(rollup_timer(config, tick_tx));

    loop {
        tokio::select! {
            Some(()) = tick_rx.recv() => {
                if let Err(e) = scheduler.run(Utc::now()).await {
                    warn!(error = %e, "rollup run failed");
                }
            }
            _ = shutdown_rx.changed() => {
                tracing::debug!("Rollup worker shutting down");
                break;
            }
        }
    }
    timer.abort();
}

/// Sends a message on `tx` at each rollup time (cron or fixed interval).
async fn rollup_timer(config: RollupWorkerConfig, tx: mpsc::Sender<()>) {
    if let Some(ref cron_str) = config.schedule {
        let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid rollup schedule; rollups will not run");
            return;
        };
        loop {
            let now = Utc::now();
            if let Some(next) = schedule.after(&now).next() {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let interval = Duration::from_secs(config.interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}
