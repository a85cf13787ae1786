// Shared test helpers
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use vmdb_metrics::metrics_repo::MetricsRepo;
use vmdb_metrics::models::*;
use vmdb_metrics::stats_source::{StatsError, StatsSource};

/// Fresh metrics store in a temp dir with one seeded database.
/// Keep the `TempDir` alive for the duration of the test.
pub async fn temp_repo() -> (TempDir, Arc<MetricsRepo>, DatabaseContext) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metrics.db");
    let repo = MetricsRepo::connect(path.to_str().unwrap(), 2).await.unwrap();
    repo.init().await.unwrap();
    let database = repo.seed_database("vmdb_test").await.unwrap();
    (dir, Arc::new(repo), database)
}

pub async fn add_table(repo: &MetricsRepo, database: &DatabaseContext, name: &str) -> MonitoredResource {
    repo.insert_resource(database.id, name, ResourceKind::Table, name, None)
        .await
        .unwrap()
}

pub async fn add_index(
    repo: &MetricsRepo,
    database: &DatabaseContext,
    table: &MonitoredResource,
    name: &str,
) -> MonitoredResource {
    repo.insert_resource(database.id, name, ResourceKind::Index, &table.name, Some(table.id))
        .await
        .unwrap()
}

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

pub fn hourly(resource_id: i64, timestamp: DateTime<Utc>, values: MetricValues) -> MetricRecord {
    MetricRecord {
        resource_id,
        capture_interval_name: CaptureInterval::Hourly,
        timestamp,
        values,
    }
}

/// Reference instant of the rollup fixture below.
pub fn fixture_ts() -> DateTime<Utc> {
    utc(2012, 8, 15, 10, 0, 1)
}

/// (hours before fixture_ts, rows, size, wasted_bytes, percent_bloat)
pub const ROLLUP_FIXTURE: [(i64, i64, i64, f64, f64); 51] = [
    (50, 0, 0, 0.0, 0.0),
    (49, 10, 100, 2.0, 0.2),
    (48, 10, 100, 2.0, 0.2),
    (47, 20, 200, 4.0, 0.4),
    (46, 20, 200, 4.0, 0.4),
    (45, 20, 200, 4.0, 0.4),
    (44, 30, 300, 6.0, 0.5),
    (43, 40, 400, 8.0, 0.6),
    (42, 50, 500, 10.0, 0.7),
    (41, 60, 600, 12.0, 0.8),
    (40, 60, 600, 12.0, 0.8),
    (39, 70, 700, 14.0, 1.0),
    (38, 80, 800, 16.0, 1.0),
    (37, 90, 900, 18.0, 4.0),
    (36, 100, 1000, 20.0, 5.0),
    (35, 110, 1100, 22.0, 6.0),
    (34, 120, 1200, 24.0, 9.0),
    (33, 130, 1300, 26.0, 11.4),
    (32, 130, 1300, 26.0, 11.4),
    (31, 130, 1300, 26.0, 11.4),
    (30, 140, 1400, 28.0, 14.5),
    (29, 150, 1500, 30.0, 15.0),
    (28, 160, 1600, 32.0, 16.0),
    (27, 170, 1700, 34.0, 17.0),
    (26, 180, 1800, 36.0, 18.3),
    (25, 190, 1900, 38.0, 19.0),
    (24, 200, 2000, 40.0, 20.0),
    (23, 200, 2000, 40.0, 20.0),
    (22, 210, 2100, 42.0, 21.6),
    (21, 220, 2200, 44.0, 22.1),
    (20, 240, 2400, 26.0, 24.0),
    (19, 250, 2500, 28.0, 25.0),
    (18, 260, 2600, 30.0, 26.0),
    (17, 290, 2900, 32.0, 29.0),
    (16, 300, 3000, 34.0, 30.4),
    (15, 340, 3400, 36.0, 34.4),
    (14, 350, 3500, 38.0, 35.0),
    (13, 350, 3500, 40.0, 35.3),
    (12, 360, 3600, 40.0, 36.5),
    (11, 380, 3800, 42.0, 38.8),
    (10, 400, 4000, 44.0, 40.9),
    (9, 410, 4100, 60.0, 41.1),
    (8, 420, 4200, 62.0, 42.0),
    (7, 420, 4200, 64.0, 42.0),
    (6, 430, 4300, 70.0, 43.4),
    (5, 440, 4400, 72.0, 44.7),
    (4, 460, 4600, 74.0, 46.3),
    (3, 470, 4700, 76.0, 47.0),
    (2, 480, 4800, 80.0, 48.5),
    (1, 490, 4900, 84.0, 49.0),
    (0, 500, 5000, 90.0, 50.7),
];

pub fn fixture_records(resource_id: i64) -> Vec<MetricRecord> {
    let ts = fixture_ts();
    ROLLUP_FIXTURE
        .iter()
        .map(|&(hours_before, rows, size, wasted_bytes, percent_bloat)| {
            hourly(
                resource_id,
                ts - TimeDelta::hours(hours_before),
                MetricValues {
                    rows,
                    size,
                    wasted_bytes,
                    percent_bloat,
                    ..MetricValues::default()
                },
            )
        })
        .collect()
}

pub async fn insert_fixture(repo: &MetricsRepo, resource_id: i64) {
    for record in fixture_records(resource_id) {
        repo.insert_metric(&record).await.unwrap();
    }
}

/// In-memory stats source with scripted tables, indexes, values and failures.
pub struct FakeStatsSource {
    tables: Mutex<BTreeSet<String>>,
    indexes: Mutex<HashMap<String, Vec<IndexDefinition>>>,
    values: Mutex<HashMap<String, MetricValues>>,
    failing: Mutex<HashSet<String>>,
    now: Mutex<DateTime<Utc>>,
}

impl FakeStatsSource {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(BTreeSet::new()),
            indexes: Mutex::new(HashMap::new()),
            values: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            now: Mutex::new(utc(2024, 1, 1, 0, 0, 0)),
        }
    }

    pub fn with_table(self, table: &str, indexes: &[&str]) -> Self {
        self.set_table(table, indexes);
        self
    }

    pub fn set_table(&self, table: &str, indexes: &[&str]) {
        self.tables.lock().unwrap().insert(table.to_string());
        let defs = indexes
            .iter()
            .map(|name| IndexDefinition {
                table: table.to_string(),
                name: name.to_string(),
                unique: name.ends_with("_pkey"),
                columns: vec!["id".to_string()],
            })
            .collect();
        self.indexes.lock().unwrap().insert(table.to_string(), defs);
    }

    pub fn drop_table(&self, table: &str) {
        self.tables.lock().unwrap().remove(table);
        self.indexes.lock().unwrap().remove(table);
    }

    pub fn set_values(&self, name: &str, values: MetricValues) {
        self.values.lock().unwrap().insert(name.to_string(), values);
    }

    pub fn fail(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn advance(&self, by: TimeDelta) {
        *self.now.lock().unwrap() += by;
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[async_trait]
impl StatsSource for FakeStatsSource {
    async fn list_monitored_objects(&self) -> Result<BTreeSet<String>, StatsError> {
        Ok(self.tables.lock().unwrap().clone())
    }

    async fn list_indexes(&self, table: &str) -> Result<Vec<IndexDefinition>, StatsError> {
        if self.failing.lock().unwrap().contains(table) {
            return Err(StatsError::Unavailable {
                reason: format!("scripted failure for {table}"),
            });
        }
        Ok(self
            .indexes
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_raw_stats(&self, resource: &MonitoredResource) -> Result<RawSnapshot, StatsError> {
        if self.failing.lock().unwrap().contains(&resource.name) {
            return Err(StatsError::Unavailable {
                reason: format!("scripted failure for {}", resource.name),
            });
        }
        let values = self
            .values
            .lock()
            .unwrap()
            .get(&resource.name)
            .cloned()
            .unwrap_or_default();
        Ok(RawSnapshot::new(self.now(), values))
    }
}
