//! Conversion between drained accumulators, stored rows and reporting series

use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::error::{AppError, Result};
use crate::models::{Accumulator, BucketKey, PinType, ReportingPoint, StoredRecord};
use crate::table::Snapshot;

/// Builds the row for one bucket, storing the accumulator's average.
pub fn to_row(key: &BucketKey, acc: &Accumulator) -> StoredRecord {
    StoredRecord {
        owner: key.owner.to_string(),
        device_id: key.device_id,
        pin: key.pin,
        pin_type: key.pin_type,
        ts: key.bucket_start,
        value: acc.average(),
    }
}

/// Encodes a drained snapshot, ordered by key so batches are deterministic.
pub fn to_records(snapshot: &Snapshot) -> Vec<StoredRecord> {
    let mut entries: Vec<_> = snapshot.iter().collect();
    entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
    entries.into_iter().map(|(key, acc)| to_row(key, acc)).collect()
}

/// Reduces query results to a series sorted by timestamp ascending.
pub fn from_query(records: impl IntoIterator<Item = StoredRecord>) -> Vec<ReportingPoint> {
    let mut points: Vec<_> = records
        .into_iter()
        .map(|record| ReportingPoint {
            ts: record.ts,
            value: record.value,
        })
        .collect();
    points.sort_by_key(|p| p.ts);
    points
}

/// Decodes a row of any `reporting_average_*` table.
pub fn record_from_row(row: &PgRow) -> Result<StoredRecord> {
    let pin_type: String = row.try_get("pintype")?;
    let pin_type = pin_type
        .chars()
        .next()
        .and_then(PinType::from_char)
        .ok_or_else(|| AppError::InternalError(format!("Unknown pin type '{}' in row", pin_type)))?;
    let pin: i16 = row.try_get("pin")?;
    let pin = u8::try_from(pin)
        .map_err(|_| AppError::InternalError(format!("Pin {} out of range in row", pin)))?;

    Ok(StoredRecord {
        owner: row.try_get("username")?,
        device_id: row.try_get("project_id")?,
        pin,
        pin_type,
        ts: row.try_get("ts")?,
        value: row.try_get("value")?,
    })
}
