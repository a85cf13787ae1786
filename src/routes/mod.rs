// HTTP routes: read-only JSON views over the metrics store

mod http;

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::metrics_repo::MetricsRepo;
use crate::models::DatabaseContext;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) repo: Arc<MetricsRepo>,
    pub(crate) database: DatabaseContext,
}

pub fn app(repo: Arc<MetricsRepo>, database: DatabaseContext) -> Router {
    let state = AppState { repo, database };
    Router::new()
        .route("/", get(|| async { "vmdb-metrics: table and index metrics" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/resources", get(http::list_resources_handler)) // GET /api/resources
        .route(
            "/api/resources/{name}/metrics",
            get(http::resource_metrics_handler),
        ) // GET /api/resources/{name}/metrics?interval=&from=&to=
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
