//! Aggregation flush task - drains one granularity's closed buckets into storage

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::coordinator::PersistenceCoordinator;
use crate::models::Granularity;

/// Background task that periodically flushes one aggregation table.
///
/// Ticks are aligned to multiples of the granularity's `flush_interval`
/// (by default its bucket period) plus the configured grace, so with default
/// settings each bucket is written once, shortly after it closes. The tick
/// only drains and queues the batch; the write itself runs on the offload
/// pool. Exits when `shutdown` fires.
pub async fn flush_task(
    coordinator: Arc<PersistenceCoordinator>,
    granularity: Granularity,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = coordinator.config().granularity(granularity).flush_interval;
    let grace = coordinator.config().flush_grace;
    let clock = TaskClock::start();

    let first = first_tick_delay(clock.now().timestamp_millis(), period, grace);
    let mut interval = tokio::time::interval_at(Instant::now() + first, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        granularity = %granularity,
        interval_ms = period.as_millis() as u64,
        first_tick_ms = first.as_millis() as u64,
        "Aggregation flush task started"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }

        match coordinator.flush(granularity, clock.now()).await {
            Ok(0) => {}
            Ok(records) => {
                debug!(granularity = %granularity, records = records, "Flush cycle queued");
            }
            Err(e) => {
                error!(granularity = %granularity, error = %e, "Flush cycle failed");
            }
        }
    }

    info!(granularity = %granularity, "Aggregation flush task stopped");
}

/// Time from `now_millis` until the next multiple of `period`, plus `grace`.
pub fn first_tick_delay(now_millis: i64, period: Duration, grace: Duration) -> Duration {
    let period_millis = i64::try_from(period.as_millis()).unwrap_or(i64::MAX).max(1);
    let into_period = now_millis.rem_euclid(period_millis);
    Duration::from_millis((period_millis - into_period) as u64) + grace
}

/// Wall clock anchored at task start and advanced by the tokio clock, so
/// bucket-closing decisions follow the same time source as the ticks.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TaskClock {
    started: Instant,
    wall: DateTime<Utc>,
}

impl TaskClock {
    pub(crate) fn start() -> Self {
        Self {
            started: Instant::now(),
            wall: Utc::now(),
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall + elapsed
    }
}
