// Background capture worker: every tick, sync the monitored resources with the
// stats source, then capture all tables (and their indexes).

use crate::capture::{CaptureSummary, MetricCapture};
use crate::metrics_repo::MetricsRepo;
use crate::models::DatabaseContext;
use crate::registry;
use crate::stats_source::StatsSource;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio::time::{Duration, interval};

/// Repos, collaborators, counters and shutdown for the worker.
pub struct WorkerDeps {
    pub repo: Arc<MetricsRepo>,
    pub source: Arc<dyn StatsSource>,
    pub capture: Arc<MetricCapture>,
    pub database: DatabaseContext,
    pub metrics_recorded_total: Arc<AtomicU64>,
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Worker timing. Stats logging uses its own real-time interval.
pub struct WorkerConfig {
    pub capture_interval_secs: u64,
    /// How often to log totals (real seconds).
    pub stats_log_interval_secs: u64,
}

/// One capture pass. Resource sync failures are logged; capture still runs
/// against the resources already known.
pub async fn run_one_capture(
    repo: &MetricsRepo,
    source: &dyn StatsSource,
    capture: &MetricCapture,
    database: &DatabaseContext,
) -> anyhow::Result<CaptureSummary> {
    if let Err(e) = registry::sync_resources(repo, source, database).await {
        tracing::warn!(error = %e, operation = "sync_resources", "resource sync failed");
    }
    let summary = capture.capture_all(database).await?;
    tracing::debug!(
        operation = "capture_all",
        recorded = summary.recorded,
        seeded = summary.seeded,
        failed = summary.failed,
        "capture pass complete"
    );
    Ok(summary)
}

pub fn spawn(deps: WorkerDeps, config: WorkerConfig) -> tokio::task::JoinHandle<()> {
    let WorkerDeps {
        repo,
        source,
        capture,
        database,
        metrics_recorded_total,
        mut shutdown_rx,
    } = deps;
    let WorkerConfig {
        capture_interval_secs,
        stats_log_interval_secs,
    } = config;

    tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(capture_interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut stats_log_tick = interval(Duration::from_secs(stats_log_interval_secs));
        stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut capture_failures_total: u64 = 0;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match run_one_capture(&repo, source.as_ref(), &capture, &database).await {
                        Ok(summary) => {
                            metrics_recorded_total.fetch_add(summary.recorded as u64, Ordering::Relaxed);
                            capture_failures_total += summary.failed as u64;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, operation = "capture_all", "capture pass failed");
                            capture_failures_total += 1;
                        }
                    }
                }
                _ = stats_log_tick.tick() => {
                    tracing::info!(
                        database = %database.name,
                        metrics_recorded_total = metrics_recorded_total.load(Ordering::Relaxed),
                        capture_failures_total,
                        "capture stats"
                    );
                }
                _ = shutdown_rx.changed() => {
                    tracing::debug!("Capture worker shutting down");
                    break;
                }
            }
        }
    })
}
