//! Retention task - prunes one granularity's records beyond its horizon

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::coordinator::PersistenceCoordinator;
use crate::models::Granularity;
use crate::tasks::aggregation::TaskClock;

/// Background task that periodically queues a retention sweep for one
/// granularity table.
///
/// The first sweep runs one `retention_interval` after start to let the
/// system stabilize. Exits when `shutdown` fires.
pub async fn retention_task(
    coordinator: Arc<PersistenceCoordinator>,
    granularity: Granularity,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = coordinator.config().granularity(granularity).retention_interval;
    let clock = TaskClock::start();
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        granularity = %granularity,
        interval_secs = period.as_secs(),
        "Retention task started"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }

        info!(granularity = %granularity, "Running retention cleanup...");
        if let Err(e) = coordinator.sweep(granularity, clock.now()).await {
            error!(granularity = %granularity, error = %e, "Failed to queue retention sweep");
        }
    }

    info!(granularity = %granularity, "Retention task stopped");
}
