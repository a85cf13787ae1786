// Metric capture: raw snapshot + prior snapshot -> hourly delta record.
// The first capture of a resource only seeds its snapshot slot.

use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{debug, instrument, warn};

use crate::locks::ResourceLocks;
use crate::metrics_repo::MetricsRepo;
use crate::models::{
    CaptureInterval, DatabaseContext, MetricRecord, MetricValues, MonitoredResource, RawSnapshot,
};
use crate::stats_source::StatsSource;

const DEFAULT_CONCURRENCY: usize = 4;

/// Result of capturing a table and its indexes.
#[derive(Debug, Clone, Default)]
pub struct CaptureOutcome {
    /// The table's own record; `None` on its first capture or when it failed.
    pub metric: Option<MetricRecord>,
    /// The table's own fetch or write failed. Its indexes are still captured.
    pub table_failed: bool,
    pub indexes_recorded: usize,
    pub indexes_seeded: usize,
    pub indexes_failed: usize,
}

/// Totals over one `capture_all` pass. Index captures are included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub recorded: usize,
    pub seeded: usize,
    pub failed: usize,
}

/// Builds the interval record from two consecutive raw snapshots.
/// Counters become `current - prior`, clamped at zero; the names of counters
/// that went backwards are returned alongside. Gauges are copied from `current`.
pub fn derive_metric(
    resource_id: i64,
    prior: &RawSnapshot,
    current: &RawSnapshot,
) -> (MetricRecord, Vec<&'static str>) {
    let (p, c) = (&prior.values, &current.values);
    let mut regressed = Vec::new();
    let mut delta = |column: &'static str, now: i64, before: i64| {
        if now < before {
            regressed.push(column);
            0
        } else {
            now - before
        }
    };

    let values = MetricValues {
        table_scans: delta("table_scans", c.table_scans, p.table_scans),
        sequential_rows_read: delta(
            "sequential_rows_read",
            c.sequential_rows_read,
            p.sequential_rows_read,
        ),
        index_scans: delta("index_scans", c.index_scans, p.index_scans),
        index_rows_fetched: delta(
            "index_rows_fetched",
            c.index_rows_fetched,
            p.index_rows_fetched,
        ),
        rows_inserted: delta("rows_inserted", c.rows_inserted, p.rows_inserted),
        rows_updated: delta("rows_updated", c.rows_updated, p.rows_updated),
        rows_deleted: delta("rows_deleted", c.rows_deleted, p.rows_deleted),
        rows_hot_updated: delta("rows_hot_updated", c.rows_hot_updated, p.rows_hot_updated),
        size: c.size,
        rows: c.rows,
        pages: c.pages,
        percent_bloat: c.percent_bloat,
        wasted_bytes: c.wasted_bytes,
        otta: c.otta,
        rows_live: c.rows_live,
        rows_dead: c.rows_dead,
    };

    let record = MetricRecord {
        resource_id,
        capture_interval_name: CaptureInterval::FINEST,
        timestamp: current.captured_at,
        values,
    };
    (record, regressed)
}

pub struct MetricCapture {
    repo: Arc<MetricsRepo>,
    source: Arc<dyn StatsSource>,
    locks: Arc<ResourceLocks>,
    concurrency: usize,
}

impl MetricCapture {
    pub fn new(
        repo: Arc<MetricsRepo>,
        source: Arc<dyn StatsSource>,
        locks: Arc<ResourceLocks>,
    ) -> Self {
        Self {
            repo,
            source,
            locks,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Max number of tables captured at once by `capture_all`.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Captures one resource. Returns the new record, or `None` when this was
    /// the first capture and only the snapshot slot was seeded.
    #[instrument(skip(self, resource), fields(operation = "capture", resource = %resource.name))]
    pub async fn capture(
        &self,
        resource: &MonitoredResource,
    ) -> anyhow::Result<Option<MetricRecord>> {
        let _guard = self.locks.lock(resource.id).await;

        let current = self.source.fetch_raw_stats(resource).await?;
        let prior = self.repo.get_prior_snapshot(resource.id).await?;

        let metric = prior.map(|prior| {
            let (metric, regressed) = derive_metric(resource.id, &prior, &current);
            if !regressed.is_empty() {
                warn!(
                    resource = %resource.name,
                    columns = ?regressed,
                    "counters went backwards (stats reset?); deltas clamped to zero"
                );
            }
            metric
        });

        self.repo
            .save_capture(resource.id, &current, metric.as_ref())
            .await?;
        if metric.is_none() {
            debug!(resource = %resource.name, "first capture; snapshot seeded");
        }
        Ok(metric)
    }

    /// Captures a table, then each of its indexes. Every resource is captured
    /// independently: a failure is logged and counted, never propagated.
    pub async fn capture_with_indexes(&self, table: &MonitoredResource) -> CaptureOutcome {
        let mut outcome = CaptureOutcome::default();
        match self.capture(table).await {
            Ok(metric) => outcome.metric = metric,
            Err(e) => {
                warn!(error = %e, table = %table.name, "table capture failed");
                outcome.table_failed = true;
            }
        }

        let indexes = match self.repo.list_indexes(table.id).await {
            Ok(indexes) => indexes,
            Err(e) => {
                warn!(error = %e, table = %table.name, "listing indexes failed; skipping index capture");
                return outcome;
            }
        };

        for index in &indexes {
            match self.capture(index).await {
                Ok(Some(_)) => outcome.indexes_recorded += 1,
                Ok(None) => outcome.indexes_seeded += 1,
                Err(e) => {
                    warn!(
                        error = %e,
                        table = %table.name,
                        index = %index.name,
                        "index capture failed"
                    );
                    outcome.indexes_failed += 1;
                }
            }
        }
        outcome
    }

    /// Captures every table of `database` (with indexes), several tables at a time.
    pub async fn capture_all(&self, database: &DatabaseContext) -> anyhow::Result<CaptureSummary> {
        let tables = self.repo.list_tables(database.id).await?;

        let outcomes: std::pin::Pin<
            Box<dyn std::future::Future<Output = Vec<CaptureOutcome>> + Send + '_>,
        > = Box::pin(
            futures_util::stream::iter(tables.iter())
                .map(|table| self.capture_with_indexes(table))
                .buffer_unordered(self.concurrency)
                .collect(),
        );
        let outcomes: Vec<CaptureOutcome> = outcomes.await;

        let mut summary = CaptureSummary::default();
        for outcome in outcomes {
            if outcome.table_failed {
                summary.failed += 1;
            } else if outcome.metric.is_some() {
                summary.recorded += 1;
            } else {
                summary.seeded += 1;
            }
            summary.recorded += outcome.indexes_recorded;
            summary.seeded += outcome.indexes_seeded;
            summary.failed += outcome.indexes_failed;
        }
        Ok(summary)
    }
}
