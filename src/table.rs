//! Swappable aggregation table for one granularity
//!
//! The active generation is an `Arc<DashMap>` behind an [`ArcSwap`]. Writers
//! clone the `Arc`, update their entry under the shard lock and drop the
//! `Arc` again. [`AggregationTable::drain`] swaps in an empty generation and
//! then waits until it owns the only reference to the old one, so a merge
//! either finished inside the drained generation or landed in the new one.

use arc_swap::ArcSwap;
use crossbeam::utils::Backoff;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{Accumulator, BucketKey, Granularity};

type Generation = DashMap<BucketKey, Accumulator>;

/// Open accumulation window for one granularity.
pub struct AggregationTable {
    granularity: Granularity,
    active: ArcSwap<Generation>,
}

impl AggregationTable {
    pub fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            active: ArcSwap::from_pointee(DashMap::new()),
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Adds `value` to the accumulator for `key`, creating it on first use.
    pub fn merge(&self, key: BucketKey, value: f64) {
        let generation = self.active.load_full();
        generation
            .entry(key)
            .and_modify(|acc| acc.merge(value))
            .or_insert_with(|| Accumulator::new(value));
    }

    /// Replaces the active generation with an empty one and returns the
    /// previous generation's contents.
    pub fn drain(&self) -> Snapshot {
        Snapshot {
            granularity: self.granularity,
            entries: self.retire().into_iter().collect(),
        }
    }

    /// Drains only buckets that ended at or before `close_before` (epoch
    /// millis). Still-open buckets go back into the active generation with
    /// their sum and count intact, so a bucket is flushed once, whole.
    pub fn drain_closed(&self, close_before: i64) -> Snapshot {
        let period = self.granularity.period_millis();
        let mut entries = HashMap::new();
        let mut open = Vec::new();
        for (key, acc) in self.retire() {
            if key.bucket_start.saturating_add(period) <= close_before {
                entries.insert(key, acc);
            } else {
                open.push((key, acc));
            }
        }

        if !open.is_empty() {
            let generation = self.active.load_full();
            for (key, acc) in open {
                generation
                    .entry(key)
                    .and_modify(|current| current.combine(&acc))
                    .or_insert(acc);
            }
        }

        Snapshot {
            granularity: self.granularity,
            entries,
        }
    }

    /// Swaps in an empty generation and takes sole ownership of the old one.
    fn retire(&self) -> Generation {
        let mut retired = self.active.swap(Arc::new(DashMap::new()));

        // Writers that loaded the retired generation before the swap still
        // hold a clone; wait for them to finish.
        let backoff = Backoff::new();
        loop {
            match Arc::try_unwrap(retired) {
                Ok(generation) => return generation,
                Err(shared) => {
                    retired = shared;
                    backoff.snooze();
                }
            }
        }
    }

    /// Number of distinct bucket keys in the active generation
    pub fn len(&self) -> usize {
        self.active.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.load().is_empty()
    }

    /// Current accumulator for `key` in the active generation, if any
    pub fn get(&self, key: &BucketKey) -> Option<Accumulator> {
        self.active.load().get(key).map(|acc| *acc)
    }
}

/// Immutable contents of a drained generation, ready to be flushed.
#[derive(Debug, Clone)]
pub struct Snapshot {
    granularity: Granularity,
    entries: HashMap<BucketKey, Accumulator>,
}

impl Snapshot {
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &BucketKey) -> Option<&Accumulator> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BucketKey, &Accumulator)> {
        self.entries.iter()
    }
}

#[cfg(test)]
impl Snapshot {
    pub(crate) fn from_entries(
        granularity: Granularity,
        entries: HashMap<BucketKey, Accumulator>,
    ) -> Self {
        Self {
            granularity,
            entries,
        }
    }
}
