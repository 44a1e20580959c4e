//! Average aggregator - fans each sample out to the minute, hourly and daily tables

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::models::{BucketKey, Granularity, PinType};
use crate::table::{AggregationTable, Snapshot};

/// Maintains running averages for every pin at all three granularities.
///
/// `merge` only touches memory and never fails, so ingestion keeps working
/// while storage is unavailable.
pub struct Aggregator {
    minute: AggregationTable,
    hourly: AggregationTable,
    daily: AggregationTable,
    samples_merged: AtomicU64,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            minute: AggregationTable::new(Granularity::Minute),
            hourly: AggregationTable::new(Granularity::Hourly),
            daily: AggregationTable::new(Granularity::Daily),
            samples_merged: AtomicU64::new(0),
        }
    }

    /// Merges one validated sample into every granularity.
    ///
    /// # Arguments
    /// * `owner` - Account owning the device, shared by every key it creates
    /// * `device_id` - Device / project identifier
    /// * `pin_type` - Pin kind
    /// * `pin` - Pin number
    /// * `ts_millis` - Sample timestamp, epoch millis
    /// * `value` - Sample value
    pub fn merge(
        &self,
        owner: &Arc<str>,
        device_id: i32,
        pin_type: PinType,
        pin: u8,
        ts_millis: i64,
        value: f64,
    ) {
        for table in self.tables() {
            let bucket_start = table.granularity().bucket_start(ts_millis);
            let key = BucketKey::new(Arc::clone(owner), device_id, pin_type, pin, bucket_start);
            table.merge(key, value);
        }
        self.samples_merged.fetch_add(1, Ordering::Relaxed);
    }

    /// Swaps out the active table for `granularity`, see [`AggregationTable::drain`].
    pub fn drain(&self, granularity: Granularity) -> Snapshot {
        self.table(granularity).drain()
    }

    /// Drains the buckets of `granularity` that closed at or before
    /// `close_before`, see [`AggregationTable::drain_closed`].
    pub fn drain_closed(&self, granularity: Granularity, close_before: i64) -> Snapshot {
        self.table(granularity).drain_closed(close_before)
    }

    pub fn table(&self, granularity: Granularity) -> &AggregationTable {
        match granularity {
            Granularity::Minute => &self.minute,
            Granularity::Hourly => &self.hourly,
            Granularity::Daily => &self.daily,
        }
    }

    /// Number of bucket keys waiting in the active table
    pub fn pending(&self, granularity: Granularity) -> usize {
        self.table(granularity).len()
    }

    /// Total samples merged since start
    pub fn samples_merged(&self) -> u64 {
        self.samples_merged.load(Ordering::Relaxed)
    }

    fn tables(&self) -> [&AggregationTable; 3] {
        [&self.minute, &self.hourly, &self.daily]
    }
}
