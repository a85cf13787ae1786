// Rollup scheduler: picks the window for each configured interval and rolls it
// up for every monitored resource of the database.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::metrics_repo::MetricsRepo;
use crate::models::{CaptureInterval, DatabaseContext};
use crate::rollup::MetricRollup;

/// What one scheduler pass did. Every (window, resource) pair lands in
/// exactly one of `written`, `skipped` (empty window) or `failed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollupReport {
    pub windows: Vec<(CaptureInterval, DateTime<Utc>)>,
    pub written: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RollupReport {
    pub(crate) fn merge(&mut self, other: RollupReport) {
        self.windows.extend(other.windows);
        self.written += other.written;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

pub struct RollupScheduler {
    repo: Arc<MetricsRepo>,
    rollup: MetricRollup,
    database: DatabaseContext,
    intervals: Vec<CaptureInterval>,
    windows: Mutex<WindowState>,
}

/// Per-interval window bookkeeping across runs.
#[derive(Default)]
struct WindowState {
    last: HashMap<CaptureInterval, DateTime<Utc>>,
    /// Past windows with at least one failed resource, re-rolled until clean.
    retry: BTreeSet<(CaptureInterval, DateTime<Utc>)>,
}

impl RollupScheduler {
    /// `intervals` are rolled in the given order; list finer ones first so
    /// coarser rollups see fresh input.
    pub fn new(
        repo: Arc<MetricsRepo>,
        rollup: MetricRollup,
        database: DatabaseContext,
        intervals: Vec<CaptureInterval>,
    ) -> Self {
        Self {
            repo,
            rollup,
            database,
            intervals,
            windows: Mutex::new(WindowState::default()),
        }
    }

    pub fn intervals(&self) -> &[CaptureInterval] {
        &self.intervals
    }

    /// Rolls up the window containing `now` for each interval. Past windows
    /// are rolled first: the window of the previous run once `now` has moved
    /// past it (so samples captured after that run are included), and any
    /// window that still has failed resources.
    pub async fn run(&self, now: DateTime<Utc>) -> anyhow::Result<RollupReport> {
        let mut report = RollupReport::default();
        for &interval in &self.intervals {
            let window_start = interval.window_start(now);
            let past = self.past_windows(interval, window_start).await;
            for start in past {
                let window = match self.rollup_window(interval, start).await {
                    Ok(window) => window,
                    Err(e) => {
                        self.windows.lock().await.retry.insert((interval, start));
                        return Err(e);
                    }
                };
                let mut state = self.windows.lock().await;
                if window.failed > 0 {
                    state.retry.insert((interval, start));
                } else {
                    state.retry.remove(&(interval, start));
                }
                report.merge(window);
            }
            // recorded first so a failed current window is re-rolled once `now` moves on
            self.windows.lock().await.last.insert(interval, window_start);
            report.merge(self.rollup_window(interval, window_start).await?);
        }
        Ok(report)
    }

    /// Windows before `current` that need rolling this run, oldest first.
    async fn past_windows(
        &self,
        interval: CaptureInterval,
        current: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        let state = self.windows.lock().await;
        let mut past: BTreeSet<DateTime<Utc>> = state
            .retry
            .iter()
            .filter(|(i, _)| *i == interval)
            .map(|&(_, start)| start)
            .collect();
        if let Some(&prev) = state.last.get(&interval)
            && prev < current
        {
            past.insert(prev);
        }
        past.retain(|&start| start < current);
        past.into_iter().collect()
    }

    /// Rolls one window for every resource. A failing resource is logged and
    /// counted; the rest still run and it is retried on the next pass.
    pub async fn rollup_window(
        &self,
        interval: CaptureInterval,
        window_start: DateTime<Utc>,
    ) -> anyhow::Result<RollupReport> {
        let resources = self.repo.list_resources(self.database.id).await?;
        let mut report = RollupReport {
            windows: vec![(interval, window_start)],
            ..RollupReport::default()
        };

        for resource in &resources {
            match self.rollup.rollup(resource, interval, window_start).await {
                Ok(Some(_)) => report.written += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    warn!(
                        error = %e,
                        resource = %resource.name,
                        %interval,
                        %window_start,
                        "rollup failed; will retry next run"
                    );
                    report.failed += 1;
                }
            }
        }

        if report.written > 0 || report.failed > 0 {
            info!(
                %interval,
                %window_start,
                written = report.written,
                skipped = report.skipped,
                failed = report.failed,
                "rollup window"
            );
        }
        Ok(report)
    }
}
