//! Application state shared across handlers

use crate::aggregator::Aggregator;
use crate::offload::OffloadPool;
use crate::routes::metrics::Metrics;
use crate::store::ReportingStore;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Durable reporting storage
    pub store: Arc<dyn ReportingStore>,
    /// In-memory averages fed by ingestion
    pub aggregator: Arc<Aggregator>,
    /// Worker pool running storage writes
    pub offload: Arc<OffloadPool>,
    /// Persistence metrics for Prometheus
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Create new application state
    ///
    /// # Arguments
    /// * `store` - Reporting storage
    /// * `aggregator` - Aggregator shared with ingestion
    /// * `offload` - Offload pool shared with the coordinator
    /// * `metrics` - Metrics shared with the coordinator
    pub fn new(
        store: Arc<dyn ReportingStore>,
        aggregator: Arc<Aggregator>,
        offload: Arc<OffloadPool>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            aggregator,
            offload,
            metrics,
        }
    }
}
