//! Storage interface used by the flush, retention and query paths

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::Result;
use crate::models::{Granularity, PinType, ReportingQuery, StoredRecord};

/// Durable destination for reporting averages.
///
/// `upsert_batch` must commit the whole batch atomically and overwrite the
/// value of rows that already exist, so replaying a batch is harmless.
#[async_trait]
pub trait ReportingStore: Send + Sync {
    /// Writes `records` into the table for `granularity`, returns rows written.
    async fn upsert_batch(&self, granularity: Granularity, records: &[StoredRecord]) -> Result<u64>;

    /// Deletes rows whose bucket start is strictly older than `cutoff_millis`.
    async fn delete_older_than(&self, granularity: Granularity, cutoff_millis: i64) -> Result<u64>;

    /// Rows for one pin within `[from, to)`, at most `limit`, oldest first.
    async fn select(&self, query: &ReportingQuery) -> Result<Vec<StoredRecord>>;

    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> Result<()>;

    /// Releases connections. Called once, after the last flush.
    async fn close(&self);
}

type RowId = (String, i32, u8, PinType, i64);

/// In-process store with the same upsert semantics as the SQL tables.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<Granularity, HashMap<RowId, f64>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently held for `granularity`
    pub fn len(&self, granularity: Granularity) -> usize {
        self.tables
            .read()
            .get(&granularity)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, granularity: Granularity) -> bool {
        self.len(granularity) == 0
    }

    /// All rows of one granularity, in key order
    pub fn records(&self, granularity: Granularity) -> Vec<StoredRecord> {
        let tables = self.tables.read();
        let mut records: Vec<_> = tables
            .get(&granularity)
            .into_iter()
            .flatten()
            .map(|(id, value)| to_record(id, *value))
            .collect();
        records.sort_by(|a, b| {
            (&a.owner, a.device_id, a.pin, a.pin_type, a.ts)
                .cmp(&(&b.owner, b.device_id, b.pin, b.pin_type, b.ts))
        });
        records
    }
}

fn to_record(id: &RowId, value: f64) -> StoredRecord {
    let (owner, device_id, pin, pin_type, ts) = id;
    StoredRecord {
        owner: owner.clone(),
        device_id: *device_id,
        pin: *pin,
        pin_type: *pin_type,
        ts: *ts,
        value,
    }
}

#[async_trait]
impl ReportingStore for MemoryStore {
    async fn upsert_batch(&self, granularity: Granularity, records: &[StoredRecord]) -> Result<u64> {
        let mut tables = self.tables.write();
        let table = tables.entry(granularity).or_default();
        for r in records {
            table.insert(
                (r.owner.clone(), r.device_id, r.pin, r.pin_type, r.ts),
                r.value,
            );
        }
        Ok(records.len() as u64)
    }

    async fn delete_older_than(&self, granularity: Granularity, cutoff_millis: i64) -> Result<u64> {
        let mut tables = self.tables.write();
        let Some(table) = tables.get_mut(&granularity) else {
            return Ok(0);
        };
        let before = table.len();
        table.retain(|(_, _, _, _, ts), _| *ts >= cutoff_millis);
        Ok((before - table.len()) as u64)
    }

    async fn select(&self, query: &ReportingQuery) -> Result<Vec<StoredRecord>> {
        let tables = self.tables.read();
        let mut records: Vec<_> = tables
            .get(&query.granularity)
            .into_iter()
            .flatten()
            .filter(|((owner, device_id, pin, pin_type, ts), _)| {
                *owner == query.owner
                    && *device_id == query.device_id
                    && *pin == query.pin
                    && *pin_type == query.pin_type
                    && *ts >= query.from
                    && *ts < query.to
            })
            .map(|(id, value)| to_record(id, *value))
            .collect();
        records.sort_by_key(|r| r.ts);
        records.truncate(usize::try_from(query.limit.max(0)).unwrap_or(usize::MAX));
        Ok(records)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {}
}
