//! HTTP ingestion endpoint feeding samples into the aggregator

use axum::{extract::State, http::StatusCode, Json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::models::{IngestRequest, IngestResponse};
use crate::state::AppState;

/// Largest batch accepted in one request
pub const MAX_BATCH: usize = 10_000;

/// POST /api/v1/ingest
///
/// Merges a batch of pin samples into the in-memory averages. Invalid
/// samples are skipped and counted; the rest are accepted.
///
/// Returns 202 Accepted with the accepted and rejected counts.
pub async fn ingest_samples(
    State(state): State<AppState>,
    Json(payload): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>)> {
    let total = payload.samples.len();
    if total > MAX_BATCH {
        return Err(AppError::InvalidRequest(format!(
            "Batch of {} samples exceeds the limit of {}",
            total, MAX_BATCH
        )));
    }

    // One shared owner string per request, however many samples it has
    let mut owners: HashMap<String, Arc<str>> = HashMap::new();
    let mut accepted = 0;
    let mut rejected = 0;

    for sample in payload.samples {
        if let Err(e) = sample.validate() {
            debug!(error = %e, "Rejected sample");
            rejected += 1;
            continue;
        }

        let owner = owners
            .entry(sample.owner)
            .or_insert_with_key(|owner| Arc::from(owner.as_str()));
        state.aggregator.merge(
            owner,
            sample.device_id,
            sample.pin_type,
            sample.pin,
            sample.ts,
            sample.value,
        );
        accepted += 1;
    }

    if rejected > 0 {
        state.metrics.inc_rejected(rejected as u64);
        warn!(
            total = total,
            accepted = accepted,
            rejected = rejected,
            "Some samples failed validation"
        );
    } else {
        debug!(total = total, accepted = accepted, "Samples ingested");
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse { accepted, rejected }),
    ))
}
