// Raw (cumulative) statistics sample for one resource.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MetricValues;

/// One sample read from the stats source. Counter fields in `values` are
/// cumulative since the monitored server started; gauges are point-in-time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSnapshot {
    pub captured_at: DateTime<Utc>,
    pub values: MetricValues,
}

impl RawSnapshot {
    pub fn new(captured_at: DateTime<Utc>, values: MetricValues) -> Self {
        Self {
            captured_at,
            values,
        }
    }
}
