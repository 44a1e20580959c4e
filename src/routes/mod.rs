//! HTTP routes: probes, metrics, sample ingestion and the reporting query API

pub mod health;
pub mod ingest;
pub mod metrics;
pub mod reporting;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health and metrics (Kubernetes probes + Prometheus)
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/metrics", get(metrics::prometheus_metrics))
        // Sample ingestion
        .route("/api/v1/ingest", post(ingest::ingest_samples))
        // Reporting series
        .route(
            "/api/v1/reporting/{owner}/{device_id}/{pin_type}/{pin}",
            get(reporting::get_series),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
