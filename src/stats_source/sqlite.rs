// Stats source backed by a SQLite database file.
// Sizes, pages and free space come from the dbstat virtual table when the
// SQLite build has it; otherwise only row counts are reported. SQLite keeps no
// cumulative scan or tuple counters, so those fields stay zero.

use std::collections::BTreeSet;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::sync::OnceCell;
use tracing::instrument;

use super::{StatsError, StatsSource};
use crate::models::{IndexDefinition, MetricValues, MonitoredResource, RawSnapshot, ResourceKind};

pub struct SqliteStatsSource {
    pool: SqlitePool,
    dbstat_available: OnceCell<bool>,
}

impl SqliteStatsSource {
    /// Opens an existing database file for introspection.
    pub async fn connect(path: &str) -> anyhow::Result<Self> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(false)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(opts)
            .await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            dbstat_available: OnceCell::new(),
        }
    }

    async fn has_dbstat(&self) -> bool {
        *self
            .dbstat_available
            .get_or_init(|| async {
                match sqlx::query("SELECT 1 FROM dbstat LIMIT 1")
                    .fetch_optional(&self.pool)
                    .await
                {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::info!(error = %e, "dbstat unavailable; reporting row counts only");
                        false
                    }
                }
            })
            .await
    }

    /// Name of the b-tree that stores `resource`. A primary key reported as
    /// `<table>_pkey` lives in its `sqlite_autoindex_*` b-tree when it has
    /// one, and in the table b-tree otherwise (INTEGER PRIMARY KEY).
    async fn storage_object(&self, resource: &MonitoredResource) -> Result<String, StatsError> {
        let kind = sqlx::query_scalar::<_, String>("SELECT type FROM sqlite_master WHERE name = $1")
            .bind(&resource.name)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err(&resource.name))?;

        match (resource.kind, kind.as_deref()) {
            (ResourceKind::Table, Some("table")) => Ok(resource.name.clone()),
            (ResourceKind::Index, Some("index")) => Ok(resource.name.clone()),
            (ResourceKind::Index, None) if resource.name == pkey_name(&resource.table_name) => {
                let autoindex = self.pk_autoindex(&resource.table_name).await?;
                Ok(autoindex.unwrap_or_else(|| resource.table_name.clone()))
            }
            _ => Err(StatsError::NotFound {
                name: resource.name.clone(),
            }),
        }
    }

    async fn pk_autoindex(&self, table: &str) -> Result<Option<String>, StatsError> {
        sqlx::query_scalar::<_, String>(
            "SELECT name FROM pragma_index_list($1) WHERE origin = 'pk'",
        )
        .bind(table)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_err(table))
    }

    async fn dbstat_values(&self, object: &str) -> Result<MetricValues, StatsError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS pages,
                    COALESCE(SUM(pgsize), 0) AS size,
                    COALESCE(SUM(unused), 0) AS unused,
                    COALESCE(SUM(CASE WHEN pagetype = 'leaf' THEN ncell ELSE 0 END), 0) AS cells
             FROM dbstat WHERE name = $1",
        )
        .bind(object)
        .fetch_one(&self.pool)
        .await
        .map_err(query_err(object))?;
        let page_size = sqlx::query_scalar::<_, i64>("SELECT page_size FROM pragma_page_size()")
            .fetch_one(&self.pool)
            .await
            .map_err(query_err(object))?;

        let get = |col: &str| row.try_get::<i64, _>(col).map_err(query_err(object));
        let pages = get("pages")?;
        let size = get("size")?;
        let unused = get("unused")?;
        let rows = get("cells")?;

        let percent_bloat = if size > 0 {
            unused as f64 / size as f64 * 100.0
        } else {
            0.0
        };
        let otta = if page_size > 0 {
            ((size - unused) as f64 / page_size as f64).ceil()
        } else {
            0.0
        };

        Ok(MetricValues {
            size,
            rows,
            pages,
            percent_bloat,
            wasted_bytes: unused as f64,
            otta,
            rows_live: rows,
            ..MetricValues::default()
        })
    }

    async fn row_count_values(&self, table: &str) -> Result<MetricValues, StatsError> {
        let rows = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)))
            .fetch_one(&self.pool)
            .await
            .map_err(query_err(table))?;
        Ok(MetricValues {
            rows,
            rows_live: rows,
            ..MetricValues::default()
        })
    }
}

#[async_trait]
impl StatsSource for SqliteStatsSource {
    #[instrument(skip(self), fields(source = "sqlite", operation = "list_monitored_objects"))]
    async fn list_monitored_objects(&self) -> Result<BTreeSet<String>, StatsError> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_err("sqlite_master"))?;
        Ok(names.into_iter().collect())
    }

    #[instrument(skip(self), fields(source = "sqlite", operation = "list_indexes"))]
    async fn list_indexes(&self, table: &str) -> Result<Vec<IndexDefinition>, StatsError> {
        let columns = sqlx::query("SELECT name, pk FROM pragma_table_info($1) ORDER BY pk, cid")
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(query_err(table))?;
        if columns.is_empty() {
            return Err(StatsError::NotFound {
                name: table.to_string(),
            });
        }

        let mut out = Vec::new();
        let mut pk_columns = Vec::new();
        for c in &columns {
            let pk: i64 = c.try_get("pk").map_err(query_err(table))?;
            if pk > 0 {
                pk_columns.push(c.try_get::<String, _>("name").map_err(query_err(table))?);
            }
        }
        if !pk_columns.is_empty() {
            out.push(IndexDefinition {
                table: table.to_string(),
                name: pkey_name(table),
                unique: true,
                columns: pk_columns,
            });
        }

        let indexes = sqlx::query(
            r#"SELECT name, "unique", origin FROM pragma_index_list($1) ORDER BY name"#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err(table))?;

        for idx in &indexes {
            let origin: String = idx.try_get("origin").map_err(query_err(table))?;
            // covered by the <table>_pkey entry above
            if origin == "pk" {
                continue;
            }
            let name: String = idx.try_get("name").map_err(query_err(table))?;
            let unique: i64 = idx.try_get("unique").map_err(query_err(table))?;
            let columns = sqlx::query_scalar::<_, Option<String>>(
                "SELECT name FROM pragma_index_info($1) ORDER BY seqno",
            )
            .bind(&name)
            .fetch_all(&self.pool)
            .await
            .map_err(query_err(&name))?
            .into_iter()
            .map(|c| c.unwrap_or_else(|| "<expression>".to_string()))
            .collect();
            out.push(IndexDefinition {
                table: table.to_string(),
                name,
                unique: unique != 0,
                columns,
            });
        }
        Ok(out)
    }

    #[instrument(skip(self, resource), fields(source = "sqlite", operation = "fetch_raw_stats", resource = %resource.name))]
    async fn fetch_raw_stats(
        &self,
        resource: &MonitoredResource,
    ) -> Result<RawSnapshot, StatsError> {
        let object = self.storage_object(resource).await?;
        let values = if self.has_dbstat().await {
            self.dbstat_values(&object).await?
        } else {
            self.row_count_values(&resource.table_name).await?
        };
        Ok(RawSnapshot::new(Utc::now(), values))
    }
}

fn pkey_name(table: &str) -> String {
    format!("{}_pkey", table)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn query_err(name: &str) -> impl Fn(sqlx::Error) -> StatsError + '_ {
    move |source| StatsError::Query {
        name: name.to_string(),
        source,
    }
}
