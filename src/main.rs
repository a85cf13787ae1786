use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;
use vmdb_metrics::*;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;

    let repo = Arc::new(
        metrics_repo::MetricsRepo::connect(
            &app_config.database.path,
            app_config.database.max_pool_size,
        )
        .await?,
    );
    repo.init().await?;
    let database = repo.seed_database(&app_config.monitored.name).await?;

    let source: Arc<dyn stats_source::StatsSource> = Arc::new(
        stats_source::SqliteStatsSource::connect(&app_config.monitored.path)
            .await
            .map_err(|e| anyhow::anyhow!("monitored database {}: {}", app_config.monitored.path, e))?,
    );
    registry::sync_resources(&repo, source.as_ref(), &database).await?;

    let locks = Arc::new(locks::ResourceLocks::new());
    let capture = Arc::new(
        capture::MetricCapture::new(repo.clone(), source.clone(), locks.clone())
            .with_concurrency(app_config.capture.concurrency),
    );
    let scheduler = Arc::new(scheduler::RollupScheduler::new(
        repo.clone(),
        rollup::MetricRollup::new(repo.clone(), locks),
        database.clone(),
        app_config.rollup.intervals.clone(),
    ));

    if app_config.rollup.backfill_on_start {
        backfill::run_backfill(&repo, &scheduler, chrono::Utc::now()).await?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_handle = worker::spawn(
        worker::WorkerDeps {
            repo: repo.clone(),
            source,
            capture,
            database: database.clone(),
            metrics_recorded_total: Arc::new(AtomicU64::new(0)),
            shutdown_rx: shutdown_rx.clone(),
        },
        worker::WorkerConfig {
            capture_interval_secs: app_config.capture.interval_secs,
            stats_log_interval_secs: app_config.monitoring.stats_log_interval_secs,
        },
    );
    let rollup_handle = rollup_worker::spawn(
        scheduler,
        rollup_worker::RollupWorkerConfig {
            schedule: app_config.rollup.schedule.clone(),
            interval_secs: app_config.rollup.interval_secs,
        },
        shutdown_rx,
    );

    let app = routes::app(repo, database);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(_) => {
                        let _ = tokio::signal::ctrl_c().await;
                        return;
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
        } => {
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
            let _ = worker_handle.await;
            let _ = rollup_handle.await;
        }
    }

    Ok(())
}
