//! Persistence coordinator - drains aggregation tables into storage
//!
//! Timer tasks call [`PersistenceCoordinator::flush`] and
//! [`PersistenceCoordinator::sweep`]; both only drain/encode in memory and
//! hand the storage work to the [`OffloadPool`]. Periodic flushes take only
//! closed buckets, so a stored average always covers its whole bucket. A batch that still fails
//! after the retry policy is exhausted is dropped and reported, never merged
//! back into the active table.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::aggregator::Aggregator;
use crate::codec;
use crate::config::Config;
use crate::error::Result;
use crate::models::{Granularity, StoredRecord};
use crate::offload::OffloadPool;
use crate::retry::RetryPolicy;
use crate::routes::metrics::Metrics;
use crate::store::ReportingStore;
use crate::table::Snapshot;
use crate::tasks::{aggregation, retention};

pub struct PersistenceCoordinator {
    aggregator: Arc<Aggregator>,
    store: Arc<dyn ReportingStore>,
    offload: Arc<OffloadPool>,
    metrics: Arc<Metrics>,
    config: Config,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PersistenceCoordinator {
    pub fn new(
        aggregator: Arc<Aggregator>,
        store: Arc<dyn ReportingStore>,
        offload: Arc<OffloadPool>,
        metrics: Arc<Metrics>,
        config: Config,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            aggregator,
            store,
            offload,
            metrics,
            config,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Drains the buckets of `granularity` that closed at least
    /// `flush_grace` before `now` and queues their batch upsert. Open buckets
    /// stay in memory.
    ///
    /// Returns the number of records handed to the offload pool.
    pub async fn flush(&self, granularity: Granularity, now: DateTime<Utc>) -> Result<usize> {
        let close_before = now
            .timestamp_millis()
            .saturating_sub(duration_millis(self.config.flush_grace));
        let snapshot = self.aggregator.drain_closed(granularity, close_before);
        self.submit_snapshot(snapshot).await
    }

    /// Drains every granularity completely, open buckets included, and queues
    /// the batches. Used on shutdown. Failures are logged and skipped.
    pub async fn flush_all(&self) -> usize {
        let mut queued = 0;
        for g in Granularity::ALL {
            if let Ok(count) = self.submit_snapshot(self.aggregator.drain(g)).await {
                queued += count;
            }
        }
        queued
    }

    async fn submit_snapshot(&self, snapshot: Snapshot) -> Result<usize> {
        let granularity = snapshot.granularity();
        if snapshot.is_empty() {
            debug!(granularity = %granularity, "Nothing to flush");
            return Ok(0);
        }

        let records = codec::to_records(&snapshot);
        drop(snapshot);
        let count = records.len();
        let job = write_batch(
            Arc::clone(&self.store),
            Arc::clone(&self.metrics),
            self.config.retry,
            granularity,
            records,
        );

        if let Err(e) = self.offload.submit(job).await {
            self.metrics.inc_dropped(count as u64);
            error!(
                granularity = %granularity,
                records = count,
                error = %e,
                "Dropped reporting batch, offload pool unavailable"
            );
            return Err(e);
        }

        debug!(granularity = %granularity, records = count, "Reporting batch queued");
        Ok(count)
    }

    /// Queues deletion of records older than the granularity's retention
    /// horizon, measured back from `now`. Returns the cutoff in epoch millis.
    pub async fn sweep(&self, granularity: Granularity, now: DateTime<Utc>) -> Result<i64> {
        let horizon = duration_millis(self.config.granularity(granularity).retention);
        // Saturates for horizons past the representable range, deleting nothing
        let cutoff = now.timestamp_millis().saturating_sub(horizon);

        let job = sweep_table(
            Arc::clone(&self.store),
            Arc::clone(&self.metrics),
            self.config.retry,
            granularity,
            cutoff,
        );
        self.offload.submit(job).await?;
        Ok(cutoff)
    }

    pub async fn sweep_all(&self, now: DateTime<Utc>) {
        for g in Granularity::ALL {
            if let Err(e) = self.sweep(g, now).await {
                error!(granularity = %g, error = %e, "Failed to queue retention sweep");
            }
        }
    }

    /// Spawns a flush loop and a retention loop per granularity.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        for g in Granularity::ALL {
            tasks.push(tokio::spawn(aggregation::flush_task(
                Arc::clone(self),
                g,
                self.shutdown_tx.subscribe(),
            )));
            tasks.push(tokio::spawn(retention::retention_task(
                Arc::clone(self),
                g,
                self.shutdown_tx.subscribe(),
            )));
        }
        info!(tasks = tasks.len(), "Persistence coordinator started");
    }

    /// Stops the timer loops, flushes whatever is still accumulated, waits for
    /// the offload pool and finally closes the store.
    pub async fn shutdown(&self) {
        let timeout = self.config.shutdown_timeout;
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(timeout, task).await.is_err() {
                warn!("Timer task did not stop in time, aborting");
                abort.abort();
            }
        }

        let queued = self.flush_all().await;
        info!(records = queued, "Final flush queued");

        if !self.offload.shutdown(timeout).await {
            warn!(
                in_flight = self.offload.in_flight(),
                "Shutting down with storage work still in flight"
            );
        }

        self.store.close().await;
        info!("Persistence coordinator stopped");
    }
}

fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

async fn write_batch(
    store: Arc<dyn ReportingStore>,
    metrics: Arc<Metrics>,
    retry: RetryPolicy,
    granularity: Granularity,
    records: Vec<StoredRecord>,
) {
    let store = &*store;
    let batch = &records[..];
    let result = retry
        .run(
            "flush",
            move || store.upsert_batch(granularity, batch),
            || metrics.inc_retries(),
        )
        .await;

    match result {
        Ok(written) => {
            metrics.inc_flushed(batch.len() as u64);
            debug!(granularity = %granularity, rows = written, "Reporting batch flushed");
        }
        Err(e) => {
            metrics.inc_dropped(batch.len() as u64);
            error!(
                granularity = %granularity,
                records = batch.len(),
                attempts = retry.max_attempts,
                error = %e,
                "Dropped reporting batch after exhausting retries"
            );
        }
    }
}

async fn sweep_table(
    store: Arc<dyn ReportingStore>,
    metrics: Arc<Metrics>,
    retry: RetryPolicy,
    granularity: Granularity,
    cutoff: i64,
) {
    let store = &*store;
    let result = retry
        .run(
            "retention",
            move || store.delete_older_than(granularity, cutoff),
            || metrics.inc_retries(),
        )
        .await;

    match result {
        Ok(deleted) => {
            metrics.inc_retention_deleted(deleted);
            if deleted > 0 {
                info!(granularity = %granularity, deleted = deleted, cutoff = cutoff, "Pruned old reporting records");
            } else {
                debug!(granularity = %granularity, cutoff = cutoff, "No old reporting records to prune");
            }
        }
        Err(e) => {
            metrics.inc_retention_failures();
            error!(granularity = %granularity, cutoff = cutoff, error = %e, "Retention sweep failed");
        }
    }
}
