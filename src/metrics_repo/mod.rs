// SQLite store for monitored resources, raw snapshot slots and metric records.
// Timestamps are stored as epoch milliseconds (UTC).

mod blob;
mod schema;

use crate::models::{
    CaptureInterval, DatabaseContext, MetricRecord, MetricValues, MonitoredResource, RawSnapshot,
    ResourceKind,
};
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

const INSERT_METRIC_SQL: &str = r#"
    INSERT INTO vmdb_metrics
    (resource_id, capture_interval_name, timestamp,
     size, "rows", pages, percent_bloat, wasted_bytes, otta, rows_live, rows_dead,
     table_scans, sequential_rows_read, index_scans, index_rows_fetched,
     rows_inserted, rows_updated, rows_deleted, rows_hot_updated)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
"#;

const UPSERT_METRIC_SQL: &str = r#"
    INSERT INTO vmdb_metrics
    (resource_id, capture_interval_name, timestamp,
     size, "rows", pages, percent_bloat, wasted_bytes, otta, rows_live, rows_dead,
     table_scans, sequential_rows_read, index_scans, index_rows_fetched,
     rows_inserted, rows_updated, rows_deleted, rows_hot_updated)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
    ON CONFLICT (resource_id, capture_interval_name, timestamp) DO UPDATE SET
        size = excluded.size,
        "rows" = excluded."rows",
        pages = excluded.pages,
        percent_bloat = excluded.percent_bloat,
        wasted_bytes = excluded.wasted_bytes,
        otta = excluded.otta,
        rows_live = excluded.rows_live,
        rows_dead = excluded.rows_dead,
        table_scans = excluded.table_scans,
        sequential_rows_read = excluded.sequential_rows_read,
        index_scans = excluded.index_scans,
        index_rows_fetched = excluded.index_rows_fetched,
        rows_inserted = excluded.rows_inserted,
        rows_updated = excluded.rows_updated,
        rows_deleted = excluded.rows_deleted,
        rows_hot_updated = excluded.rows_hot_updated
"#;

const SELECT_METRIC_COLUMNS: &str = r#"resource_id, capture_interval_name, timestamp,
     size, "rows", pages, percent_bloat, wasted_bytes, otta, rows_live, rows_dead,
     table_scans, sequential_rows_read, index_scans, index_rows_fetched,
     rows_inserted, rows_updated, rows_deleted, rows_hot_updated"#;

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>;

pub struct MetricsRepo {
    pool: SqlitePool,
}

impl MetricsRepo {
    pub async fn connect(path: &str, max_pool_size: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        schema::init_tables(&self.pool).await
    }

    /// Finds or creates the database row for `name`.
    #[instrument(skip(self), fields(repo = "metrics", operation = "seed_database"))]
    pub async fn seed_database(&self, name: &str) -> anyhow::Result<DatabaseContext> {
        sqlx::query("INSERT INTO vmdb_databases (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await?;
        let row = sqlx::query("SELECT id, name FROM vmdb_databases WHERE name = $1")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(DatabaseContext {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        })
    }

    /// All resources (tables and indexes) of a database, in creation order.
    pub async fn list_resources(&self, database_id: i64) -> anyhow::Result<Vec<MonitoredResource>> {
        let rows = sqlx::query(
            "SELECT id, database_id, name, kind, table_name, parent_id FROM vmdb_resources
             WHERE database_id = $1 ORDER BY id ASC",
        )
        .bind(database_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_resource_row).collect()
    }

    pub async fn list_tables(&self, database_id: i64) -> anyhow::Result<Vec<MonitoredResource>> {
        let rows = sqlx::query(
            "SELECT id, database_id, name, kind, table_name, parent_id FROM vmdb_resources
             WHERE database_id = $1 AND kind = 'table' ORDER BY id ASC",
        )
        .bind(database_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_resource_row).collect()
    }

    /// Index resources owned by the table resource `table_id`.
    pub async fn list_indexes(&self, table_id: i64) -> anyhow::Result<Vec<MonitoredResource>> {
        let rows = sqlx::query(
            "SELECT id, database_id, name, kind, table_name, parent_id FROM vmdb_resources
             WHERE parent_id = $1 AND kind = 'index' ORDER BY id ASC",
        )
        .bind(table_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_resource_row).collect()
    }

    /// Looks a resource up by name; a table wins over an index of the same name.
    pub async fn find_resource(
        &self,
        database_id: i64,
        name: &str,
    ) -> anyhow::Result<Option<MonitoredResource>> {
        let row = sqlx::query(
            "SELECT id, database_id, name, kind, table_name, parent_id FROM vmdb_resources
             WHERE database_id = $1 AND name = $2 ORDER BY kind DESC LIMIT 1",
        )
        .bind(database_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_resource_row).transpose()
    }

    #[instrument(skip(self), fields(repo = "metrics", operation = "insert_resource"))]
    pub async fn insert_resource(
        &self,
        database_id: i64,
        name: &str,
        kind: ResourceKind,
        table_name: &str,
        parent_id: Option<i64>,
    ) -> anyhow::Result<MonitoredResource> {
        let r = sqlx::query(
            "INSERT INTO vmdb_resources (database_id, name, kind, table_name, parent_id) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(database_id)
        .bind(name)
        .bind(kind.as_str())
        .bind(table_name)
        .bind(parent_id)
        .execute(&self.pool)
        .await?;
        Ok(MonitoredResource {
            id: r.last_insert_rowid(),
            database_id,
            name: name.to_string(),
            kind,
            table_name: table_name.to_string(),
            parent_id,
        })
    }

    /// Removes a resource, the indexes it owns, and their snapshot slots.
    /// Metric history is left in place.
    #[instrument(skip(self), fields(repo = "metrics", operation = "delete_resource"))]
    pub async fn delete_resource(&self, id: i64) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM vmdb_raw_snapshots WHERE resource_id IN
             (SELECT id FROM vmdb_resources WHERE id = $1 OR parent_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        let r = sqlx::query("DELETE FROM vmdb_resources WHERE id = $1 OR parent_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(r.rows_affected())
    }

    /// The stored prior snapshot, if any. An unreadable slot counts as empty.
    pub async fn get_prior_snapshot(&self, resource_id: i64) -> anyhow::Result<Option<RawSnapshot>> {
        let row = sqlx::query(
            "SELECT captured_at, data FROM vmdb_raw_snapshots WHERE resource_id = $1",
        )
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let captured_at = millis_to_utc(row.try_get("captured_at")?)?;
        let data: Vec<u8> = row.try_get("data")?;
        let Some(values) = blob::decode_values(&data) else {
            tracing::warn!(resource_id, "unreadable raw snapshot; treating as first capture");
            return Ok(None);
        };
        Ok(Some(RawSnapshot::new(captured_at, values)))
    }

    /// Writes the snapshot slot and, when present, the derived metric record
    /// in one transaction.
    #[instrument(
        skip(self, snapshot, metric),
        fields(repo = "metrics", operation = "save_capture", with_metric = metric.is_some())
    )]
    pub async fn save_capture(
        &self,
        resource_id: i64,
        snapshot: &RawSnapshot,
        metric: Option<&MetricRecord>,
    ) -> anyhow::Result<()> {
        let data = blob::encode_values(&snapshot.values)?;
        let mut tx = self.pool.begin().await?;
        if let Some(m) = metric {
            bind_metric(sqlx::query(INSERT_METRIC_SQL), m)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            "INSERT INTO vmdb_raw_snapshots (resource_id, captured_at, data) VALUES ($1, $2, $3)
             ON CONFLICT (resource_id) DO UPDATE SET captured_at = excluded.captured_at, data = excluded.data",
        )
        .bind(resource_id)
        .bind(snapshot.captured_at.timestamp_millis())
        .bind(&data)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Appends a metric record. Fails if one already exists for the same key.
    #[instrument(skip(self, metric), fields(repo = "metrics", operation = "insert_metric"))]
    pub async fn insert_metric(&self, metric: &MetricRecord) -> anyhow::Result<()> {
        bind_metric(sqlx::query(INSERT_METRIC_SQL), metric)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Inserts or overwrites the record keyed by (resource, interval, timestamp).
    #[instrument(skip(self, metric), fields(repo = "metrics", operation = "upsert_metric"))]
    pub async fn upsert_metric(&self, metric: &MetricRecord) -> anyhow::Result<()> {
        bind_metric(sqlx::query(UPSERT_METRIC_SQL), metric)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Records in [from, to) for one resource and interval. Order: ascending by timestamp.
    #[instrument(
        skip(self),
        fields(repo = "metrics", operation = "get_metrics_by_time_range")
    )]
    pub async fn get_metrics_by_time_range(
        &self,
        resource_id: i64,
        interval: CaptureInterval,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<MetricRecord>> {
        let sql = format!(
            "SELECT {SELECT_METRIC_COLUMNS} FROM vmdb_metrics
             WHERE resource_id = $1 AND capture_interval_name = $2
               AND timestamp >= $3 AND timestamp < $4
             ORDER BY timestamp ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(resource_id)
            .bind(interval.as_str())
            .bind(from.timestamp_millis())
            .bind(to.timestamp_millis())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(parse_metric_row).collect()
    }

    pub async fn count_metrics(
        &self,
        resource_id: i64,
        interval: CaptureInterval,
    ) -> anyhow::Result<i64> {
        let n = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM vmdb_metrics WHERE resource_id = $1 AND capture_interval_name = $2",
        )
        .bind(resource_id)
        .bind(interval.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }

    /// Earliest record timestamp of an interval across all resources (backfill lower bound).
    pub async fn get_min_metric_timestamp(
        &self,
        interval: CaptureInterval,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let ms = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MIN(timestamp) FROM vmdb_metrics WHERE capture_interval_name = $1",
        )
        .bind(interval.as_str())
        .fetch_one(&self.pool)
        .await?;
        ms.map(millis_to_utc).transpose()
    }
}

fn bind_metric<'q>(query: SqliteQuery<'q>, m: &MetricRecord) -> SqliteQuery<'q> {
    let v = &m.values;
    query
        .bind(m.resource_id)
        .bind(m.capture_interval_name.as_str())
        .bind(m.timestamp.timestamp_millis())
        .bind(v.size)
        .bind(v.rows)
        .bind(v.pages)
        .bind(v.percent_bloat)
        .bind(v.wasted_bytes)
        .bind(v.otta)
        .bind(v.rows_live)
        .bind(v.rows_dead)
        .bind(v.table_scans)
        .bind(v.sequential_rows_read)
        .bind(v.index_scans)
        .bind(v.index_rows_fetched)
        .bind(v.rows_inserted)
        .bind(v.rows_updated)
        .bind(v.rows_deleted)
        .bind(v.rows_hot_updated)
}

fn parse_metric_row(row: &SqliteRow) -> anyhow::Result<MetricRecord> {
    let interval: String = row.try_get("capture_interval_name")?;
    Ok(MetricRecord {
        resource_id: row.try_get("resource_id")?,
        capture_interval_name: interval.parse()?,
        timestamp: millis_to_utc(row.try_get("timestamp")?)?,
        values: MetricValues {
            size: row.try_get("size")?,
            rows: row.try_get("rows")?,
            pages: row.try_get("pages")?,
            percent_bloat: row.try_get("percent_bloat")?,
            wasted_bytes: row.try_get("wasted_bytes")?,
            otta: row.try_get("otta")?,
            rows_live: row.try_get("rows_live")?,
            rows_dead: row.try_get("rows_dead")?,
            table_scans: row.try_get("table_scans")?,
            sequential_rows_read: row.try_get("sequential_rows_read")?,
            index_scans: row.try_get("index_scans")?,
            index_rows_fetched: row.try_get("index_rows_fetched")?,
            rows_inserted: row.try_get("rows_inserted")?,
            rows_updated: row.try_get("rows_updated")?,
            rows_deleted: row.try_get("rows_deleted")?,
            rows_hot_updated: row.try_get("rows_hot_updated")?,
        },
    })
}

fn parse_resource_row(row: &SqliteRow) -> anyhow::Result<MonitoredResource> {
    let kind: String = row.try_get("kind")?;
    let kind = ResourceKind::parse(&kind)
        .ok_or_else(|| anyhow::anyhow!("unknown resource kind: {}", kind))?;
    Ok(MonitoredResource {
        id: row.try_get("id")?,
        database_id: row.try_get("database_id")?,
        name: row.try_get("name")?,
        kind,
        table_name: row.try_get("table_name")?,
        parent_id: row.try_get("parent_id")?,
    })
}

fn millis_to_utc(ms: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow::anyhow!("timestamp out of range: {}", ms))
}
