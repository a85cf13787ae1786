// MetricsRepo tests: connect, init, resources, snapshot slots, metric queries

mod common;

use chrono::TimeDelta;
use common::*;
use vmdb_metrics::metrics_repo::MetricsRepo;
use vmdb_metrics::models::*;
use tempfile::TempDir;

#[tokio::test]
async fn metrics_repo_connect_and_init_twice() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("metrics.db");
    let repo = MetricsRepo::connect(path.to_str().unwrap(), 2).await.unwrap();
    repo.init().await.unwrap();
    repo.init().await.unwrap();
    assert!(path.exists());
}

#[tokio::test]
async fn seed_database_is_idempotent() {
    let (_dir, repo, database) = temp_repo().await;
    let again = repo.seed_database("vmdb_test").await.unwrap();
    assert_eq!(database, again);
    let other = repo.seed_database("other").await.unwrap();
    assert_ne!(database.id, other.id);
}

#[tokio::test]
async fn resources_are_scoped_to_their_database() {
    let (_dir, repo, database) = temp_repo().await;
    let other = repo.seed_database("other").await.unwrap();
    add_table(&repo, &database, "accounts").await;
    add_table(&repo, &other, "accounts").await;

    assert_eq!(repo.list_tables(database.id).await.unwrap().len(), 1);
    assert_eq!(repo.list_tables(other.id).await.unwrap().len(), 1);
    assert!(repo.find_resource(database.id, "missing").await.unwrap().is_none());
}

#[tokio::test]
async fn delete_resource_drops_indexes_and_snapshots_but_keeps_history() {
    let (_dir, repo, database) = temp_repo().await;
    let table = add_table(&repo, &database, "accounts").await;
    let index = add_index(&repo, &database, &table, "accounts_pkey").await;
    let t0 = utc(2024, 1, 1, 0, 0, 0);
    repo.save_capture(index.id, &RawSnapshot::new(t0, MetricValues::default()), None)
        .await
        .unwrap();
    repo.insert_metric(&hourly(table.id, t0, MetricValues::default()))
        .await
        .unwrap();

    let removed = repo.delete_resource(table.id).await.unwrap();
    assert_eq!(removed, 2);
    assert!(repo.list_resources(database.id).await.unwrap().is_empty());
    assert!(repo.get_prior_snapshot(index.id).await.unwrap().is_none());
    assert_eq!(repo.count_metrics(table.id, CaptureInterval::Hourly).await.unwrap(), 1);
}

#[tokio::test]
async fn save_capture_replaces_the_snapshot_slot() {
    let (_dir, repo, database) = temp_repo().await;
    let table = add_table(&repo, &database, "accounts").await;
    let t0 = utc(2024, 1, 1, 0, 0, 0);
    let values = |rows| MetricValues {
        rows,
        percent_bloat: 1.5,
        ..MetricValues::default()
    };

    assert!(repo.get_prior_snapshot(table.id).await.unwrap().is_none());
    repo.save_capture(table.id, &RawSnapshot::new(t0, values(1)), None)
        .await
        .unwrap();
    let metric = hourly(table.id, t0 + TimeDelta::hours(1), values(2));
    repo.save_capture(
        table.id,
        &RawSnapshot::new(t0 + TimeDelta::hours(1), values(2)),
        Some(&metric),
    )
    .await
    .unwrap();

    let prior = repo.get_prior_snapshot(table.id).await.unwrap().unwrap();
    assert_eq!(prior.captured_at, t0 + TimeDelta::hours(1));
    assert_eq!(prior.values, values(2));
    assert_eq!(repo.count_metrics(table.id, CaptureInterval::Hourly).await.unwrap(), 1);
}

#[tokio::test]
async fn failed_capture_write_leaves_snapshot_untouched() {
    let (_dir, repo, database) = temp_repo().await;
    let table = add_table(&repo, &database, "accounts").await;
    let t0 = utc(2024, 1, 1, 0, 0, 0);
    let metric = hourly(table.id, t0, MetricValues::default());
    repo.insert_metric(&metric).await.unwrap();
    repo.save_capture(table.id, &RawSnapshot::new(t0, MetricValues::default()), None)
        .await
        .unwrap();

    // duplicate key: the metric insert fails, so the snapshot must not move
    let later = RawSnapshot::new(
        t0 + TimeDelta::hours(1),
        MetricValues {
            rows: 9,
            ..MetricValues::default()
        },
    );
    assert!(repo.save_capture(table.id, &later, Some(&metric)).await.is_err());
    let prior = repo.get_prior_snapshot(table.id).await.unwrap().unwrap();
    assert_eq!(prior.captured_at, t0);
}

#[tokio::test]
async fn time_range_is_half_open_and_ascending() {
    let (_dir, repo, database) = temp_repo().await;
    let table = add_table(&repo, &database, "accounts").await;
    let t0 = utc(2024, 1, 1, 0, 0, 0);
    for h in [3, 0, 2, 1] {
        repo.insert_metric(&hourly(table.id, t0 + TimeDelta::hours(h), MetricValues::default()))
            .await
            .unwrap();
    }

    let got = repo
        .get_metrics_by_time_range(table.id, CaptureInterval::Hourly, t0, t0 + TimeDelta::hours(3))
        .await
        .unwrap();
    let stamps: Vec<_> = got.iter().map(|m| m.timestamp).collect();
    assert_eq!(
        stamps,
        vec![t0, t0 + TimeDelta::hours(1), t0 + TimeDelta::hours(2)]
    );
    let daily = repo
        .get_metrics_by_time_range(table.id, CaptureInterval::Daily, t0, t0 + TimeDelta::days(1))
        .await
        .unwrap();
    assert!(daily.is_empty());
}

#[tokio::test]
async fn upsert_overwrites_by_key() {
    let (_dir, repo, database) = temp_repo().await;
    let table = add_table(&repo, &database, "accounts").await;
    let t0 = utc(2024, 1, 1, 0, 0, 0);
    let mut record = MetricRecord {
        resource_id: table.id,
        capture_interval_name: CaptureInterval::Daily,
        timestamp: t0,
        values: MetricValues {
            size: 10,
            ..MetricValues::default()
        },
    };
    repo.upsert_metric(&record).await.unwrap();
    record.values.size = 20;
    repo.upsert_metric(&record).await.unwrap();

    let got = repo
        .get_metrics_by_time_range(table.id, CaptureInterval::Daily, t0, t0 + TimeDelta::days(1))
        .await
        .unwrap();
    assert_eq!(got, vec![record]);
    assert!(repo.insert_metric(&got[0]).await.is_err());
}

#[tokio::test]
async fn min_metric_timestamp_per_interval() {
    let (_dir, repo, database) = temp_repo().await;
    let table = add_table(&repo, &database, "accounts").await;
    assert!(repo.get_min_metric_timestamp(CaptureInterval::Hourly).await.unwrap().is_none());

    insert_fixture(&repo, table.id).await;
    assert_eq!(
        repo.get_min_metric_timestamp(CaptureInterval::Hourly).await.unwrap(),
        Some(fixture_ts() - TimeDelta::hours(50))
    );
    assert!(repo.get_min_metric_timestamp(CaptureInterval::Daily).await.unwrap().is_none());
}
