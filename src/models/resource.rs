// Monitored database, tables and indexes.

use serde::{Deserialize, Serialize};

/// The database instance that owns a set of monitored resources.
/// Passed explicitly wherever resources are listed or created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseContext {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Table,
    Index,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Table => "table",
            ResourceKind::Index => "index",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "table" => Some(ResourceKind::Table),
            "index" => Some(ResourceKind::Index),
            _ => None,
        }
    }
}

/// A table or index whose statistics are captured.
/// For a table `table_name == name`; for an index it names the owning table
/// and `parent_id` points at the table's resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredResource {
    pub id: i64,
    pub database_id: i64,
    pub name: String,
    pub kind: ResourceKind,
    pub table_name: String,
    pub parent_id: Option<i64>,
}

/// Index definition as reported by schema introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub table: String,
    pub name: String,
    pub unique: bool,
    pub columns: Vec<String>,
}
