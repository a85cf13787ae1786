// Library for tests to access modules

pub mod backfill;
pub mod capture;
pub mod config;
pub mod locks;
pub mod metrics_repo;
pub mod models;
pub mod registry;
pub mod rollup;
pub mod rollup_worker;
pub mod routes;
pub mod scheduler;
pub mod stats_source;
pub mod worker;
