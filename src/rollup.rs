// Rollup: finer records in [window_start, window_start + interval) -> one
// coarser record. Counters are summed; gauges are time-weighted averages.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::locks::ResourceLocks;
use crate::metrics_repo::MetricsRepo;
use crate::models::{CaptureInterval, MetricRecord, MetricValues, MonitoredResource};

/// Aggregates `records` (ascending by timestamp, all inside the window) into
/// one record of `interval` stamped `window_start`. `None` when empty.
///
/// Each record is weighted by the time since the previous record, the first
/// one by the time since `window_start`. A weight that is not positive (a
/// record stamped exactly at the window start, or a repeated timestamp) is
/// replaced by the nominal length of the records' own interval. Integer
/// gauges are truncated toward zero after averaging.
pub fn rollup_records(
    records: &[MetricRecord],
    resource_id: i64,
    interval: CaptureInterval,
    window_start: DateTime<Utc>,
) -> Option<MetricRecord> {
    let first = records.first()?;
    let nominal_ms = first.capture_interval_name.duration().num_milliseconds();

    let mut prev = window_start;
    let weights: Vec<i64> = records
        .iter()
        .map(|r| {
            let elapsed = (r.timestamp - prev).num_milliseconds();
            prev = r.timestamp;
            if elapsed > 0 { elapsed } else { nominal_ms }
        })
        .collect();
    let total_weight: i64 = weights.iter().sum();

    let int_avg = |gauge: fn(&MetricValues) -> i64| -> i64 {
        let weighted: i128 = records
            .iter()
            .zip(&weights)
            .map(|(r, &w)| i128::from(gauge(&r.values)) * i128::from(w))
            .sum();
        (weighted / i128::from(total_weight)) as i64
    };
    let float_avg = |gauge: fn(&MetricValues) -> f64| -> f64 {
        let weighted: f64 = records
            .iter()
            .zip(&weights)
            .map(|(r, &w)| gauge(&r.values) * w as f64)
            .sum();
        weighted / total_weight as f64
    };
    let sum = |counter: fn(&MetricValues) -> i64| -> i64 {
        records.iter().map(|r| counter(&r.values)).sum()
    };

    Some(MetricRecord {
        resource_id,
        capture_interval_name: interval,
        timestamp: window_start,
        values: MetricValues {
            size: int_avg(|v| v.size),
            rows: int_avg(|v| v.rows),
            pages: int_avg(|v| v.pages),
            percent_bloat: float_avg(|v| v.percent_bloat),
            wasted_bytes: float_avg(|v| v.wasted_bytes),
            otta: float_avg(|v| v.otta),
            rows_live: int_avg(|v| v.rows_live),
            rows_dead: int_avg(|v| v.rows_dead),
            table_scans: sum(|v| v.table_scans),
            sequential_rows_read: sum(|v| v.sequential_rows_read),
            index_scans: sum(|v| v.index_scans),
            index_rows_fetched: sum(|v| v.index_rows_fetched),
            rows_inserted: sum(|v| v.rows_inserted),
            rows_updated: sum(|v| v.rows_updated),
            rows_deleted: sum(|v| v.rows_deleted),
            rows_hot_updated: sum(|v| v.rows_hot_updated),
        },
    })
}

pub struct MetricRollup {
    repo: Arc<MetricsRepo>,
    locks: Arc<ResourceLocks>,
}

impl MetricRollup {
    pub fn new(repo: Arc<MetricsRepo>, locks: Arc<ResourceLocks>) -> Self {
        Self { repo, locks }
    }

    /// Rolls the next finer interval up into `interval` for the window that
    /// starts at `window_start`, overwriting any earlier result for that
    /// window. An empty window writes nothing and returns `None`.
    #[instrument(
        skip(self, resource),
        fields(operation = "rollup", resource = %resource.name, interval = %interval)
    )]
    pub async fn rollup(
        &self,
        resource: &MonitoredResource,
        interval: CaptureInterval,
        window_start: DateTime<Utc>,
    ) -> anyhow::Result<Option<MetricRecord>> {
        let Some(source) = interval.source() else {
            anyhow::bail!("{} is the finest interval; nothing to roll up from", interval);
        };
        let _guard = self.locks.lock(resource.id).await;

        let window_end = window_start + interval.duration();
        let records = self
            .repo
            .get_metrics_by_time_range(resource.id, source, window_start, window_end)
            .await?;

        let Some(rolled) = rollup_records(&records, resource.id, interval, window_start) else {
            debug!(%window_start, "no {} records in window; skipping", source);
            return Ok(None);
        };
        self.repo.upsert_metric(&rolled).await?;
        debug!(%window_start, samples = records.len(), "rollup written");
        Ok(Some(rolled))
    }
}
