// Domain models: monitored resources, raw snapshots, metric records.

mod metric;
mod resource;
mod snapshot;

pub use metric::{CaptureInterval, MetricRecord, MetricValues};
pub use resource::{DatabaseContext, IndexDefinition, MonitoredResource, ResourceKind};
pub use snapshot::RawSnapshot;
