// One-time backfill: roll up every window between the earliest stored source
// record and now, for each configured interval.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::metrics_repo::MetricsRepo;
use crate::scheduler::{RollupReport, RollupScheduler};

pub async fn run_backfill(
    repo: &MetricsRepo,
    scheduler: &RollupScheduler,
    now: DateTime<Utc>,
) -> anyhow::Result<RollupReport> {
    let mut report = RollupReport::default();
    for &interval in scheduler.intervals() {
        let Some(source) = interval.source() else {
            continue;
        };
        let Some(earliest) = repo.get_min_metric_timestamp(source).await? else {
            continue;
        };

        let last = interval.window_start(now);
        let mut window_start = interval.window_start(earliest);
        while window_start <= last {
            report.merge(scheduler.rollup_window(interval, window_start).await?);
            window_start += interval.duration();
        }
    }
    info!(
        windows = report.windows.len(),
        written = report.written,
        failed = report.failed,
        "backfill complete"
    );
    Ok(report)
}
