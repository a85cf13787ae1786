// Keeps the monitored-resource rows in step with the tables and indexes the
// stats source currently reports.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::metrics_repo::MetricsRepo;
use crate::models::{DatabaseContext, MonitoredResource, ResourceKind};
use crate::stats_source::StatsSource;

/// Names to create and names to drop so that `existing` matches `observed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

pub fn reconcile(existing: &BTreeSet<String>, observed: &BTreeSet<String>) -> Reconciliation {
    Reconciliation {
        to_add: observed.difference(existing).cloned().collect(),
        to_remove: existing.difference(observed).cloned().collect(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub tables_added: usize,
    pub tables_removed: usize,
    pub indexes_added: usize,
    pub indexes_removed: usize,
}

/// Adds and removes table resources by name, then each table's index
/// resources. A table whose indexes cannot be listed keeps its current ones.
pub async fn sync_resources(
    repo: &MetricsRepo,
    source: &dyn StatsSource,
    database: &DatabaseContext,
) -> anyhow::Result<SyncReport> {
    let mut report = SyncReport::default();

    let observed = source.list_monitored_objects().await?;
    let tables = repo.list_tables(database.id).await?;
    let plan = reconcile(&names(&tables), &observed);

    for table in tables.iter().filter(|t| plan.to_remove.contains(&t.name)) {
        repo.delete_resource(table.id).await?;
        report.tables_removed += 1;
    }
    for name in &plan.to_add {
        repo.insert_resource(database.id, name, ResourceKind::Table, name, None)
            .await?;
        report.tables_added += 1;
    }

    for table in repo.list_tables(database.id).await? {
        let definitions = match source.list_indexes(&table.name).await {
            Ok(defs) => defs,
            Err(e) => {
                warn!(error = %e, table = %table.name, "listing indexes failed; keeping current set");
                continue;
            }
        };
        let observed: BTreeSet<String> = definitions.into_iter().map(|d| d.name).collect();
        let indexes = repo.list_indexes(table.id).await?;
        let plan = reconcile(&names(&indexes), &observed);

        for index in indexes.iter().filter(|i| plan.to_remove.contains(&i.name)) {
            repo.delete_resource(index.id).await?;
            report.indexes_removed += 1;
        }
        for name in &plan.to_add {
            repo.insert_resource(
                database.id,
                name,
                ResourceKind::Index,
                &table.name,
                Some(table.id),
            )
            .await?;
            report.indexes_added += 1;
        }
    }

    if report != SyncReport::default() {
        info!(
            database = %database.name,
            tables_added = report.tables_added,
            tables_removed = report.tables_removed,
            indexes_added = report.indexes_added,
            indexes_removed = report.indexes_removed,
            "monitored resources synced"
        );
    }
    Ok(report)
}

fn names(resources: &[MonitoredResource]) -> BTreeSet<String> {
    resources.iter().map(|r| r.name.clone()).collect()
}
