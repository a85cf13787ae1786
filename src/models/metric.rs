// Metric records and capture intervals.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, NaiveTime, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};
use wincode::{SchemaRead, SchemaWrite};

/// Granularity of a metric record. `Hourly` is what capture writes; the
/// coarser intervals are produced by rollup from the next finer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureInterval {
    Hourly,
    Daily,
    Weekly,
}

impl CaptureInterval {
    /// The interval capture writes.
    pub const FINEST: CaptureInterval = CaptureInterval::Hourly;

    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureInterval::Hourly => "hourly",
            CaptureInterval::Daily => "daily",
            CaptureInterval::Weekly => "weekly",
        }
    }

    /// Nominal bucket length.
    pub fn duration(&self) -> TimeDelta {
        match self {
            CaptureInterval::Hourly => TimeDelta::hours(1),
            CaptureInterval::Daily => TimeDelta::days(1),
            CaptureInterval::Weekly => TimeDelta::weeks(1),
        }
    }

    /// The finer interval this one is rolled up from, if any.
    pub fn source(&self) -> Option<CaptureInterval> {
        match self {
            CaptureInterval::Hourly => None,
            CaptureInterval::Daily => Some(CaptureInterval::Hourly),
            CaptureInterval::Weekly => Some(CaptureInterval::Daily),
        }
    }

    /// Start of the bucket containing `at` (UTC): top of the hour, midnight,
    /// or Monday midnight.
    pub fn window_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = at.date_naive();
        match self {
            CaptureInterval::Hourly => {
                let hour = NaiveTime::from_hms_opt(at.hour(), 0, 0).unwrap_or(NaiveTime::MIN);
                date.and_time(hour).and_utc()
            }
            CaptureInterval::Daily => date.and_time(NaiveTime::MIN).and_utc(),
            CaptureInterval::Weekly => {
                let back = Days::new(u64::from(date.weekday().num_days_from_monday()));
                (date - back).and_time(NaiveTime::MIN).and_utc()
            }
        }
    }
}

impl fmt::Display for CaptureInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptureInterval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(CaptureInterval::Hourly),
            "daily" => Ok(CaptureInterval::Daily),
            "weekly" => Ok(CaptureInterval::Weekly),
            other => anyhow::bail!("unknown capture interval: {other:?}"),
        }
    }
}

/// The measured columns. In a raw snapshot the counters are cumulative; in a
/// metric record they hold the activity during the record's interval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, SchemaRead, SchemaWrite)]
#[serde(rename_all = "camelCase")]
pub struct MetricValues {
    // gauges
    pub size: i64,
    pub rows: i64,
    pub pages: i64,
    pub percent_bloat: f64,
    pub wasted_bytes: f64,
    pub otta: f64,
    pub rows_live: i64,
    pub rows_dead: i64,
    // counters
    pub table_scans: i64,
    pub sequential_rows_read: i64,
    pub index_scans: i64,
    pub index_rows_fetched: i64,
    pub rows_inserted: i64,
    pub rows_updated: i64,
    pub rows_deleted: i64,
    pub rows_hot_updated: i64,
}

/// One stored measurement, unique by (resource_id, capture_interval_name, timestamp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub resource_id: i64,
    pub capture_interval_name: CaptureInterval,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub values: MetricValues,
}
