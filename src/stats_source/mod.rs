// Statistics sources: which tables a monitored database has, how they are
// indexed, and their current raw statistics. Capture and the resource
// registry only talk to the StatsSource trait.

mod sqlite;

pub use sqlite::SqliteStatsSource;

use std::collections::BTreeSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{IndexDefinition, MonitoredResource, RawSnapshot};

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("object not found in monitored database: {name}")]
    NotFound { name: String },

    #[error("statistics query failed for {name}: {source}")]
    Query {
        name: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("statistics source unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Read-only access to the monitored database's schema and statistics.
#[async_trait]
pub trait StatsSource: Send + Sync {
    /// Names of the tables that should be monitored.
    async fn list_monitored_objects(&self) -> Result<BTreeSet<String>, StatsError>;

    /// Indexes defined on `table`, including its primary key.
    async fn list_indexes(&self, table: &str) -> Result<Vec<IndexDefinition>, StatsError>;

    /// Current raw statistics for a table or index, stamped with the read time.
    async fn fetch_raw_stats(&self, resource: &MonitoredResource)
    -> Result<RawSnapshot, StatsError>;
}
