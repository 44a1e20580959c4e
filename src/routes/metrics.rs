//! Prometheus metrics endpoint

use axum::extract::State;
use axum::response::IntoResponse;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::models::Granularity;
use crate::state::AppState;

/// Persistence counters for Prometheus
#[derive(Default)]
pub struct Metrics {
    /// Batches committed to storage
    batches_flushed_total: AtomicU64,
    /// Records committed to storage
    records_flushed_total: AtomicU64,
    /// Failed storage attempts that were retried
    flush_retries_total: AtomicU64,
    /// Batches given up on after exhausting retries
    batches_dropped_total: AtomicU64,
    /// Records contained in dropped batches
    records_dropped_total: AtomicU64,
    /// Rows removed by retention sweeps
    retention_deleted_total: AtomicU64,
    /// Retention sweeps that exhausted retries
    retention_failures_total: AtomicU64,
    /// Ingested samples that failed validation
    samples_rejected_total: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_flushed(&self, records: u64) {
        self.batches_flushed_total.fetch_add(1, Ordering::Relaxed);
        self.records_flushed_total.fetch_add(records, Ordering::Relaxed);
    }

    pub fn inc_retries(&self) {
        self.flush_retries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dropped(&self, records: u64) {
        self.batches_dropped_total.fetch_add(1, Ordering::Relaxed);
        self.records_dropped_total.fetch_add(records, Ordering::Relaxed);
    }

    pub fn inc_retention_deleted(&self, rows: u64) {
        self.retention_deleted_total.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn inc_retention_failures(&self) {
        self.retention_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self, samples: u64) {
        self.samples_rejected_total.fetch_add(samples, Ordering::Relaxed);
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_flushed_total: self.batches_flushed_total.load(Ordering::Relaxed),
            records_flushed_total: self.records_flushed_total.load(Ordering::Relaxed),
            flush_retries_total: self.flush_retries_total.load(Ordering::Relaxed),
            batches_dropped_total: self.batches_dropped_total.load(Ordering::Relaxed),
            records_dropped_total: self.records_dropped_total.load(Ordering::Relaxed),
            retention_deleted_total: self.retention_deleted_total.load(Ordering::Relaxed),
            retention_failures_total: self.retention_failures_total.load(Ordering::Relaxed),
            samples_rejected_total: self.samples_rejected_total.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub batches_flushed_total: u64,
    pub records_flushed_total: u64,
    pub flush_retries_total: u64,
    pub batches_dropped_total: u64,
    pub records_dropped_total: u64,
    pub retention_deleted_total: u64,
    pub retention_failures_total: u64,
    pub samples_rejected_total: u64,
}

/// GET /metrics
///
/// Returns Prometheus-format metrics
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.metrics.get_metrics();

    let mut output = String::new();
    let counters = [
        ("samples_merged_total", "Samples merged into the aggregation tables", state.aggregator.samples_merged()),
        ("samples_rejected_total", "Ingested samples rejected by validation", snapshot.samples_rejected_total),
        ("batches_flushed_total", "Batches committed to storage", snapshot.batches_flushed_total),
        ("records_flushed_total", "Records committed to storage", snapshot.records_flushed_total),
        ("flush_retries_total", "Storage attempts that failed and were retried", snapshot.flush_retries_total),
        ("batches_dropped_total", "Batches dropped after exhausting retries", snapshot.batches_dropped_total),
        ("records_dropped_total", "Records lost in dropped batches", snapshot.records_dropped_total),
        ("retention_deleted_total", "Rows deleted by retention sweeps", snapshot.retention_deleted_total),
        ("retention_failures_total", "Retention sweeps that exhausted retries", snapshot.retention_failures_total),
        ("offload_queue_full_total", "Submissions that waited on a full offload queue", state.offload.queue_full_count()),
    ];
    for (name, help, value) in counters {
        let _ = writeln!(
            output,
            "# HELP pinreporting_{name} {help}\n# TYPE pinreporting_{name} counter\npinreporting_{name} {value}\n"
        );
    }

    let _ = writeln!(
        output,
        "# HELP pinreporting_offload_in_flight Offload tasks queued or running\n\
         # TYPE pinreporting_offload_in_flight gauge\n\
         pinreporting_offload_in_flight {}\n",
        state.offload.in_flight()
    );

    let _ = writeln!(
        output,
        "# HELP pinreporting_pending_buckets Bucket keys waiting in the active aggregation table\n\
         # TYPE pinreporting_pending_buckets gauge"
    );
    for g in Granularity::ALL {
        let _ = writeln!(
            output,
            "pinreporting_pending_buckets{{granularity=\"{}\"}} {}",
            g,
            state.aggregator.pending(g)
        );
    }

    let _ = writeln!(
        output,
        "\n# HELP pinreporting_info Build information\n\
         # TYPE pinreporting_info gauge\n\
         pinreporting_info{{version=\"{}\"}} 1",
        env!("CARGO_PKG_VERSION")
    );

    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        output,
    )
}
