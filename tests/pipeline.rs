//! End-to-end aggregation -> flush -> retention -> query on the in-memory store

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use pin_reporting::aggregator::Aggregator;
use pin_reporting::codec;
use pin_reporting::config::Config;
use pin_reporting::coordinator::PersistenceCoordinator;
use pin_reporting::models::{Granularity, PinType, ReportingPoint, ReportingQuery};
use pin_reporting::offload::OffloadPool;
use pin_reporting::routes::metrics::Metrics;
use pin_reporting::store::{MemoryStore, ReportingStore};

const OWNER: &str = "test@gmail.com";
const MINUTE: i64 = 60_000;

struct Harness {
    owner: Arc<str>,
    aggregator: Arc<Aggregator>,
    store: Arc<MemoryStore>,
    offload: Arc<OffloadPool>,
    metrics: Arc<Metrics>,
    coordinator: Arc<PersistenceCoordinator>,
}

impl Harness {
    fn new() -> Self {
        let aggregator = Arc::new(Aggregator::new());
        let store = Arc::new(MemoryStore::new());
        let offload = Arc::new(OffloadPool::new(2, 10_000));
        let metrics = Arc::new(Metrics::new());
        let coordinator = Arc::new(PersistenceCoordinator::new(
            Arc::clone(&aggregator),
            store.clone(),
            Arc::clone(&offload),
            Arc::clone(&metrics),
            Config::default(),
        ));
        Self {
            owner: Arc::from(OWNER),
            aggregator,
            store,
            offload,
            metrics,
            coordinator,
        }
    }

    fn merge(&self, ts: i64, value: f64) {
        self.aggregator
            .merge(&self.owner, 1, PinType::Virtual, 0, ts, value);
    }

    async fn flush(&self, granularity: Granularity) -> usize {
        self.coordinator.flush(granularity, Utc::now()).await.unwrap()
    }

    async fn settle(&self) {
        assert!(self.offload.wait_idle(Duration::from_secs(10)).await);
    }

    async fn series(&self, granularity: Granularity, from: i64, to: i64) -> Vec<ReportingPoint> {
        let query = ReportingQuery {
            owner: OWNER.to_string(),
            device_id: 1,
            pin_type: PinType::Virtual,
            pin: 0,
            granularity,
            from,
            to,
            limit: 100_000,
        };
        codec::from_query(self.store.select(&query).await.unwrap())
    }
}

/// Minute bucket three days back, so every bucket these tests fill is closed
fn history_start() -> i64 {
    Granularity::Minute.bucket_start(Utc::now().timestamp_millis()) - 3 * 24 * 60 * MINUTE
}

#[tokio::test]
async fn insert_1000_minutes_and_select() {
    let h = Harness::new();
    let start = history_start();

    for i in 0..1000 {
        h.merge(start + i * MINUTE, i as f64);
    }
    assert_eq!(h.flush(Granularity::Minute).await, 1000);
    h.settle().await;

    let points = h.series(Granularity::Minute, start, start + 1000 * MINUTE).await;
    assert_eq!(points.len(), 1000);
    for (i, point) in points.iter().enumerate() {
        assert_eq!(point.ts, start + i as i64 * MINUTE);
        assert!((point.value - i as f64).abs() < 0.0001);
    }
    assert_eq!(h.metrics.get_metrics().records_flushed_total, 1000);
}

#[tokio::test]
async fn retention_keeps_only_records_within_horizon() {
    let h = Harness::new();
    let start = history_start();
    let mut minute = start;

    for i in 0..370 {
        h.merge(minute, i as f64);
        minute += MINUTE;
    }
    h.flush(Granularity::Minute).await;
    h.settle().await;
    assert_eq!(h.store.len(Granularity::Minute), 370);

    // Clock is now one minute past the last record; the horizon is 360 minutes
    let now = DateTime::<Utc>::from_timestamp_millis(minute).unwrap();
    let cutoff = h.coordinator.sweep(Granularity::Minute, now).await.unwrap();
    h.settle().await;
    assert_eq!(cutoff, start + 10 * MINUTE);

    let points = h.series(Granularity::Minute, 0, i64::MAX).await;
    assert_eq!(points.len(), 360);
    assert_eq!(points[0].ts, start + 10 * MINUTE);
    assert_eq!(points[0].value, 10.0);
    assert!(points.iter().all(|p| p.ts >= cutoff));
}

#[tokio::test]
async fn reflushing_same_batch_is_idempotent() {
    let h = Harness::new();
    let start = history_start();
    for i in 0..50 {
        h.merge(start + i * MINUTE, i as f64);
        h.merge(start + i * MINUTE, i as f64 + 2.0);
    }

    let snapshot = h.aggregator.drain(Granularity::Minute);
    let records = codec::to_records(&snapshot);
    h.store.upsert_batch(Granularity::Minute, &records).await.unwrap();
    let once = h.store.records(Granularity::Minute);
    h.store.upsert_batch(Granularity::Minute, &records).await.unwrap();
    let twice = h.store.records(Granularity::Minute);

    assert_eq!(once.len(), 50);
    assert_eq!(once, twice);
    assert_eq!(twice[3].value, 4.0);
}

#[tokio::test]
async fn late_sample_overwrites_flushed_bucket() {
    let h = Harness::new();
    let start = history_start();

    h.merge(start, 10.0);
    h.flush(Granularity::Minute).await;
    h.settle().await;

    // A sample for an already closed and flushed bucket replaces the value
    h.merge(start + 1_000, 20.0);
    h.flush(Granularity::Minute).await;
    h.settle().await;

    let points = h.series(Granularity::Minute, start, start + MINUTE).await;
    assert_eq!(points, vec![ReportingPoint { ts: start, value: 20.0 }]);
}

#[tokio::test]
async fn merges_split_by_drain_are_counted_once() {
    let h = Harness::new();
    let start = history_start();

    for i in 0..30 {
        h.merge(start, i as f64);
    }
    let before = h.aggregator.drain(Granularity::Minute);
    for i in 30..100 {
        h.merge(start, i as f64);
    }
    let after = h.aggregator.drain(Granularity::Minute);

    let count = |s: &pin_reporting::table::Snapshot| s.iter().map(|(_, acc)| acc.count()).sum::<u64>();
    assert_eq!(count(&before), 30);
    assert_eq!(count(&after), 70);
}

#[tokio::test]
async fn many_concurrent_flushes_reach_quiescence() {
    let h = Harness::new();
    let ts = history_start();
    let owner: Arc<str> = Arc::from("test@test.com");

    for i in 0..60u8 {
        h.aggregator
            .merge(&owner, i32::from(i), PinType::Analog, i, ts, 1.0);
        for g in Granularity::ALL {
            h.flush(g).await;
        }
    }
    h.settle().await;

    assert_eq!(h.offload.in_flight(), 0);
    for g in Granularity::ALL {
        assert_eq!(h.store.len(g), 60);
    }
    assert_eq!(h.metrics.get_metrics().batches_flushed_total, 180);
}

#[tokio::test]
async fn concurrent_ingestion_during_flushes_loses_nothing() {
    let h = Harness::new();
    let start = history_start();

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let aggregator = Arc::clone(&h.aggregator);
            let owner = Arc::clone(&h.owner);
            std::thread::spawn(move || {
                for i in 0..2_500 {
                    aggregator.merge(&owner, 1, PinType::Virtual, t, start, i as f64);
                }
            })
        })
        .collect();

    // Flush the hourly table repeatedly while writers are running
    for _ in 0..20 {
        h.flush(Granularity::Hourly).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    for w in writers {
        w.join().unwrap();
    }
    h.flush(Granularity::Minute).await;
    h.settle().await;

    // Every sample is in the minute table exactly once
    let minute = h.store.records(Granularity::Minute);
    assert_eq!(minute.len(), 4);
    assert!(minute.iter().all(|r| (r.value - 1249.5).abs() < 1e-9));
    assert_eq!(h.aggregator.samples_merged(), 10_000);
}

#[tokio::test]
async fn open_buckets_wait_until_closed() {
    let h = Harness::new();
    let current = Granularity::Minute.bucket_start(Utc::now().timestamp_millis());

    h.merge(current, 1.0);
    h.merge(current - 2 * MINUTE, 3.0);
    assert_eq!(h.flush(Granularity::Minute).await, 1);
    h.settle().await;

    // The running minute stays in memory with its sample
    assert_eq!(h.aggregator.pending(Granularity::Minute), 1);
    let later = DateTime::<Utc>::from_timestamp_millis(current + 2 * MINUTE).unwrap();
    assert_eq!(h.coordinator.flush(Granularity::Minute, later).await.unwrap(), 1);
    h.settle().await;

    let points = h.series(Granularity::Minute, current - 2 * MINUTE, current + MINUTE).await;
    assert_eq!(
        points,
        vec![
            ReportingPoint { ts: current - 2 * MINUTE, value: 3.0 },
            ReportingPoint { ts: current, value: 1.0 },
        ]
    );
}
