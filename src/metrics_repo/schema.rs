// Table definitions. All statements are idempotent (IF NOT EXISTS).

use sqlx::SqlitePool;

pub(super) async fn init_tables(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS vmdb_databases (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL UNIQUE)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vmdb_resources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            database_id INTEGER NOT NULL REFERENCES vmdb_databases(id),
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            table_name TEXT NOT NULL,
            parent_id INTEGER,
            UNIQUE (database_id, kind, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vmdb_raw_snapshots (
            resource_id INTEGER PRIMARY KEY,
            captured_at INTEGER NOT NULL,
            data BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vmdb_metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            resource_id INTEGER NOT NULL,
            capture_interval_name TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            size INTEGER NOT NULL,
            "rows" INTEGER NOT NULL,
            pages INTEGER NOT NULL,
            percent_bloat REAL NOT NULL,
            wasted_bytes REAL NOT NULL,
            otta REAL NOT NULL,
            rows_live INTEGER NOT NULL,
            rows_dead INTEGER NOT NULL,
            table_scans INTEGER NOT NULL,
            sequential_rows_read INTEGER NOT NULL,
            index_scans INTEGER NOT NULL,
            index_rows_fetched INTEGER NOT NULL,
            rows_inserted INTEGER NOT NULL,
            rows_updated INTEGER NOT NULL,
            rows_deleted INTEGER NOT NULL,
            rows_hot_updated INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_metrics_resource_interval_ts ON vmdb_metrics(resource_id, capture_interval_name, timestamp)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
