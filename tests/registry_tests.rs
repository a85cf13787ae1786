// Registry tests: reconcile and resource sync against a stats source

mod common;

use common::*;
use std::collections::BTreeSet;
use vmdb_metrics::models::*;
use vmdb_metrics::registry::{SyncReport, reconcile, sync_resources};

fn set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn reconcile_adds_new_names() {
    let plan = reconcile(&set(&[]), &set(&["flintstones"]));
    assert_eq!(plan.to_add, set(&["flintstones"]));
    assert!(plan.to_remove.is_empty());
}

#[test]
fn reconcile_removes_vanished_names() {
    let plan = reconcile(&set(&["flintstones"]), &set(&[]));
    assert!(plan.to_add.is_empty());
    assert_eq!(plan.to_remove, set(&["flintstones"]));
}

#[test]
fn reconcile_keeps_existing_names() {
    let plan = reconcile(&set(&["flintstones"]), &set(&["flintstones"]));
    assert!(plan.is_empty());
}

#[tokio::test]
async fn sync_mirrors_tables_and_indexes() {
    let (_dir, repo, database) = temp_repo().await;
    let source = FakeStatsSource::new()
        .with_table("accounts", &["accounts_pkey", "index_accounts_on_name"])
        .with_table("users", &["users_pkey"]);

    let report = sync_resources(&repo, &source, &database).await.unwrap();
    assert_eq!(report.tables_added, 2);
    assert_eq!(report.indexes_added, 3);

    let accounts = repo.find_resource(database.id, "accounts").await.unwrap().unwrap();
    assert_eq!(accounts.kind, ResourceKind::Table);
    let indexes: Vec<String> = repo
        .list_indexes(accounts.id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(indexes, vec!["accounts_pkey", "index_accounts_on_name"]);
    for index in repo.list_indexes(accounts.id).await.unwrap() {
        assert_eq!(index.table_name, "accounts");
        assert_eq!(index.parent_id, Some(accounts.id));
    }

    let again = sync_resources(&repo, &source, &database).await.unwrap();
    assert_eq!(again, SyncReport::default());
}

#[tokio::test]
async fn sync_removes_dropped_table_with_its_indexes() {
    let (_dir, repo, database) = temp_repo().await;
    let source = FakeStatsSource::new()
        .with_table("accounts", &["accounts_pkey"])
        .with_table("flintstones", &["flintstones_pkey"]);
    sync_resources(&repo, &source, &database).await.unwrap();

    source.drop_table("flintstones");
    let report = sync_resources(&repo, &source, &database).await.unwrap();
    assert_eq!(report.tables_removed, 1);

    let names: Vec<String> = repo
        .list_resources(database.id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["accounts", "accounts_pkey"]);
}

#[tokio::test]
async fn sync_keeps_resource_ids_stable() {
    let (_dir, repo, database) = temp_repo().await;
    let source = FakeStatsSource::new().with_table("accounts", &["accounts_pkey"]);
    sync_resources(&repo, &source, &database).await.unwrap();
    let before = repo.find_resource(database.id, "accounts").await.unwrap().unwrap();

    source.set_table("accounts", &["accounts_pkey", "index_accounts_on_email"]);
    let report = sync_resources(&repo, &source, &database).await.unwrap();
    assert_eq!(report.indexes_added, 1);
    assert_eq!(report.tables_added, 0);

    let after = repo.find_resource(database.id, "accounts").await.unwrap().unwrap();
    assert_eq!(before.id, after.id);
}

#[tokio::test]
async fn index_listing_failure_keeps_current_indexes() {
    let (_dir, repo, database) = temp_repo().await;
    let source = FakeStatsSource::new().with_table("accounts", &["accounts_pkey"]);
    sync_resources(&repo, &source, &database).await.unwrap();

    source.fail("accounts");
    let report = sync_resources(&repo, &source, &database).await.unwrap();
    assert_eq!(report.indexes_removed, 0);
    let accounts = repo.find_resource(database.id, "accounts").await.unwrap().unwrap();
    assert_eq!(repo.list_indexes(accounts.id).await.unwrap().len(), 1);
}
