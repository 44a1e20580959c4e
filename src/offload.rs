//! Bounded worker pool for blocking storage work
//!
//! Flushes and retention sweeps run here so a slow database never stalls the
//! timer tasks or ingestion. The queue is bounded; when it is full the
//! submitter waits for a free slot (submitters are the periodic timer tasks,
//! never the ingestion path) and every such wait is logged and counted.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, Result};

type Job = BoxFuture<'static, ()>;

/// Fixed set of workers draining one bounded job queue.
pub struct OffloadPool {
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    in_flight: Arc<AtomicUsize>,
    queue_full: AtomicU64,
    capacity: usize,
}

impl OffloadPool {
    /// Spawns `workers` tasks on the current tokio runtime.
    ///
    /// # Arguments
    /// * `workers` - Number of concurrent jobs
    /// * `capacity` - Jobs that may wait in the queue before submitters block
    pub fn new(workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let handles = (0..workers.max(1))
            .map(|id| {
                let rx = Arc::clone(&rx);
                let in_flight = Arc::clone(&in_flight);
                tokio::spawn(worker_loop(id, rx, in_flight))
            })
            .collect();

        info!(workers = workers, capacity = capacity, "Offload pool started");

        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            in_flight,
            queue_full: AtomicU64::new(0),
            capacity,
        }
    }

    /// Queues `job`, waiting for a slot if the queue is full.
    pub async fn submit<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(tx) = self.tx.lock().clone() else {
            return Err(AppError::PoolClosed);
        };

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let job: Job = Box::pin(job);

        let result = match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                self.queue_full.fetch_add(1, Ordering::Relaxed);
                warn!(
                    capacity = self.capacity,
                    in_flight = self.in_flight(),
                    "Offload queue full, submitter waiting"
                );
                tx.send(job).await.map_err(|_| AppError::PoolClosed)
            }
            Err(TrySendError::Closed(_)) => Err(AppError::PoolClosed),
        };

        if result.is_err() {
            release(&self.in_flight);
        }
        result
    }

    /// Jobs queued or running right now
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Times a submitter had to wait on a full queue
    pub fn queue_full_count(&self) -> u64 {
        self.queue_full.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Polls until no job is queued or running. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let poll = async {
            while self.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }

    /// Stops accepting jobs, lets workers finish the queue, and aborts any
    /// worker still busy after `timeout`. Returns `true` on a clean drain.
    ///
    /// Jobs abandoned by an abort are dropped and no longer counted in
    /// [`OffloadPool::in_flight`].
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        // Dropping the last sender ends each worker loop once the queue is empty
        self.tx.lock().take();
        let mut handles: Vec<_> = std::mem::take(&mut *self.workers.lock());

        // Handles leave the vector only once joined
        let join_all = async {
            while let Some(handle) = handles.last_mut() {
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        error!(error = %e, "Offload worker exited abnormally");
                    }
                }
                handles.pop();
            }
        };

        if tokio::time::timeout(timeout, join_all).await.is_ok() {
            info!("Offload pool drained");
            return true;
        }

        warn!(
            in_flight = self.in_flight(),
            timeout_ms = timeout.as_millis() as u64,
            "Offload pool did not drain in time, aborting workers"
        );
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }

        // Workers are gone, so whatever is still counted will never run
        let abandoned = self.in_flight.swap(0, Ordering::SeqCst);
        if abandoned > 0 {
            error!(jobs = abandoned, "Offload jobs abandoned at shutdown");
        }
        false
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    in_flight: Arc<AtomicUsize>,
) {
    loop {
        let job = rx.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };

        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            error!(worker = id, "Offload job panicked");
        }
        release(&in_flight);
    }
    debug!(worker = id, "Offload worker stopped");
}

/// Decrements the in-flight count, never below zero.
fn release(in_flight: &AtomicUsize) {
    let _ = in_flight.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
}
