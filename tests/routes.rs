//! HTTP surface tests driven through the router without a network listener

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

use pin_reporting::aggregator::Aggregator;
use pin_reporting::models::{BucketKey, Granularity, IngestResponse, PinType, StoredRecord};
use pin_reporting::offload::OffloadPool;
use pin_reporting::routes::{self, ingest::MAX_BATCH, metrics::Metrics, reporting::SeriesResponse};
use pin_reporting::state::AppState;
use pin_reporting::store::{MemoryStore, ReportingStore};

async fn state_with_rows() -> AppState {
    let store = Arc::new(MemoryStore::new());
    let rows: Vec<_> = [180_000, 0, 120_000, 60_000]
        .into_iter()
        .map(|ts| StoredRecord {
            owner: "test@gmail.com".into(),
            device_id: 1,
            pin: 4,
            pin_type: PinType::Virtual,
            ts,
            value: ts as f64 / 1_000.0,
        })
        .collect();
    store.upsert_batch(Granularity::Minute, &rows).await.unwrap();

    AppState::new(
        store,
        Arc::new(Aggregator::new()),
        Arc::new(OffloadPool::new(1, 8)),
        Arc::new(Metrics::new()),
    )
}

async fn get(state: AppState, uri: &str) -> (StatusCode, String) {
    let response = routes::router(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

async fn post_json(state: AppState, uri: &str, body: serde_json::Value) -> (StatusCode, String) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = routes::router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn health_ok() {
    let (status, body) = get(state_with_rows().await, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"status\":\"ok\""));
}

#[tokio::test]
async fn ready_with_memory_store() {
    let (status, body) = get(state_with_rows().await, "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"ready\""));
}

#[tokio::test]
async fn series_sorted_ascending() {
    let (status, body) = get(
        state_with_rows().await,
        "/api/v1/reporting/test@gmail.com/1/v/4?granularity=minute&from=0&to=600000",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let series: SeriesResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(series.pin_type, PinType::Virtual);
    let ts: Vec<_> = series.points.iter().map(|p| p.ts).collect();
    assert_eq!(ts, vec![0, 60_000, 120_000, 180_000]);
    assert_eq!(series.points[1].value, 60.0);
}

#[tokio::test]
async fn series_respects_range_and_limit() {
    let (status, body) = get(
        state_with_rows().await,
        "/api/v1/reporting/test@gmail.com/1/virtual/4?from=60000&to=600000&limit=2",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let series: SeriesResponse = serde_json::from_str(&body).unwrap();
    let ts: Vec<_> = series.points.iter().map(|p| p.ts).collect();
    assert_eq!(ts, vec![60_000, 120_000]);
}

#[tokio::test]
async fn series_rejects_inverted_range() {
    let (status, body) = get(
        state_with_rows().await,
        "/api/v1/reporting/test@gmail.com/1/v/4?from=600000&to=0",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("'from' must be before 'to'"));
}

#[tokio::test]
async fn series_rejects_unknown_pin_type() {
    let (status, _) = get(
        state_with_rows().await,
        "/api/v1/reporting/test@gmail.com/1/x/4?from=0&to=1",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn metrics_expose_operational_signal() {
    let state = state_with_rows().await;
    state
        .aggregator
        .merge(&Arc::from("test@gmail.com"), 1, PinType::Analog, 2, 0, 1.0);

    let (status, body) = get(state, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("pinreporting_offload_in_flight 0"));
    assert!(body.contains("pinreporting_samples_merged_total 1"));
    assert!(body.contains("pinreporting_pending_buckets{granularity=\"hourly\"} 1"));
    assert!(body.contains("pinreporting_batches_dropped_total 0"));
}

#[tokio::test]
async fn ingest_merges_valid_samples() {
    let state = state_with_rows().await;
    let body = json!({
        "samples": [
            { "owner": "dev@test.com", "device_id": 7, "pin_type": "v", "pin": 1, "ts": 60_000, "value": 2.0 },
            { "owner": "dev@test.com", "device_id": 7, "pin_type": "virtual", "pin": 1, "ts": 90_000, "value": 4.0 },
            { "owner": "dev@test.com", "device_id": 7, "pin_type": "a", "pin": 2, "ts": 60_000, "value": 1.0 }
        ]
    });

    let (status, body) = post_json(state.clone(), "/api/v1/ingest", body).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let response: IngestResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(response.accepted, 3);
    assert_eq!(response.rejected, 0);

    assert_eq!(state.aggregator.samples_merged(), 3);
    assert_eq!(state.aggregator.pending(Granularity::Minute), 2);
    let key = BucketKey::new(Arc::from("dev@test.com"), 7, PinType::Virtual, 1, 60_000);
    let acc = state.aggregator.table(Granularity::Minute).get(&key).unwrap();
    assert_eq!(acc.average(), 3.0);
}

#[tokio::test]
async fn ingest_counts_invalid_samples() {
    let state = state_with_rows().await;
    let body = json!({
        "samples": [
            { "owner": "", "device_id": 7, "pin_type": "d", "pin": 1, "ts": 0, "value": 1.0 },
            { "owner": "dev@test.com", "device_id": 7, "pin_type": "d", "pin": 1, "ts": -1, "value": 1.0 },
            { "owner": "dev@test.com", "device_id": 7, "pin_type": "d", "pin": 1, "ts": 0, "value": 1.0 }
        ]
    });

    let (status, body) = post_json(state.clone(), "/api/v1/ingest", body).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let response: IngestResponse = serde_json::from_str(&body).unwrap();
    assert_eq!((response.accepted, response.rejected), (1, 2));
    assert_eq!(state.metrics.get_metrics().samples_rejected_total, 2);
    assert_eq!(state.aggregator.samples_merged(), 1);
}

#[tokio::test]
async fn ingest_rejects_malformed_body() {
    let state = state_with_rows().await;
    let body = json!({ "samples": [{ "owner": "dev@test.com", "pin_type": "x" }] });

    let (status, _) = post_json(state.clone(), "/api/v1/ingest", body).await;
    assert!(status.is_client_error());
    assert_eq!(state.aggregator.samples_merged(), 0);
}

#[tokio::test]
async fn ingest_rejects_oversized_batch() {
    let state = state_with_rows().await;
    let sample = json!({ "owner": "o", "device_id": 1, "pin_type": "v", "pin": 0, "ts": 0, "value": 1.0 });
    let samples = vec![sample; MAX_BATCH + 1];

    let (status, _) = post_json(state.clone(), "/api/v1/ingest", json!({ "samples": samples })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(state.aggregator.samples_merged(), 0);
}
