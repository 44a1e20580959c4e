//! Core domain models for pin reporting

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::AppError;

/// Kind of hardware pin a sample was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinType {
    /// Virtual pin
    #[serde(alias = "v")]
    Virtual,
    /// Digital pin
    #[serde(alias = "d")]
    Digital,
    /// Analog pin
    #[serde(alias = "a")]
    Analog,
}

impl PinType {
    /// Single-character code used in the `pintype` column
    pub const fn as_char(self) -> char {
        match self {
            PinType::Virtual => 'v',
            PinType::Digital => 'd',
            PinType::Analog => 'a',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'v' => Some(PinType::Virtual),
            'd' => Some(PinType::Digital),
            'a' => Some(PinType::Analog),
            _ => None,
        }
    }
}

impl fmt::Display for PinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl FromStr for PinType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v" | "virtual" => Ok(PinType::Virtual),
            "d" | "digital" => Ok(PinType::Digital),
            "a" | "analog" => Ok(PinType::Analog),
            other => Err(AppError::InvalidRequest(format!("Invalid pin type: {}", other))),
        }
    }
}

/// Aggregation granularity. Each one has its own table and retention horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute,
    Hourly,
    Daily,
}

impl Granularity {
    pub const ALL: [Granularity; 3] = [Granularity::Minute, Granularity::Hourly, Granularity::Daily];

    /// Bucket period in milliseconds
    pub const fn period_millis(self) -> i64 {
        match self {
            Granularity::Minute => 60_000,
            Granularity::Hourly => 3_600_000,
            Granularity::Daily => 86_400_000,
        }
    }

    /// Truncates an epoch-millis timestamp to the start of its bucket
    #[inline]
    pub const fn bucket_start(self, ts_millis: i64) -> i64 {
        let period = self.period_millis();
        ts_millis.div_euclid(period) * period
    }

    /// Storage table holding this granularity's averages
    pub const fn table_name(self) -> &'static str {
        match self {
            Granularity::Minute => "reporting_average_minute",
            Granularity::Hourly => "reporting_average_hourly",
            Granularity::Daily => "reporting_average_daily",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Granularity::Minute => "minute",
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one metric stream at one time bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    /// Account that owns the device
    pub owner: Arc<str>,
    /// Device / project identifier
    pub device_id: i32,
    pub pin_type: PinType,
    pub pin: u8,
    /// Epoch millis, truncated to the granularity period
    pub bucket_start: i64,
}

impl BucketKey {
    pub fn new(
        owner: Arc<str>,
        device_id: i32,
        pin_type: PinType,
        pin: u8,
        bucket_start: i64,
    ) -> Self {
        Self {
            owner,
            device_id,
            pin_type,
            pin,
            bucket_start,
        }
    }
}

/// Running average. Only ever created from a first value, so `count >= 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accumulator {
    sum: f64,
    count: u64,
}

impl Accumulator {
    pub fn new(first: f64) -> Self {
        Self { sum: first, count: 1 }
    }

    #[inline]
    pub fn merge(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    /// Folds another partial accumulator for the same bucket into this one.
    pub fn combine(&mut self, other: &Accumulator) {
        self.sum += other.sum;
        self.count += other.count;
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn average(&self) -> f64 {
        debug_assert!(self.count > 0);
        self.sum / self.count as f64
    }
}

/// Durable row in one of the granularity tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub owner: String,
    pub device_id: i32,
    pub pin: u8,
    pub pin_type: PinType,
    /// Bucket start, epoch millis
    pub ts: i64,
    /// Average of the bucket at flush time
    pub value: f64,
}

/// One raw pin reading submitted for aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestSample {
    pub owner: String,
    pub device_id: i32,
    pub pin_type: PinType,
    pub pin: u8,
    /// Sample time, epoch millis
    pub ts: i64,
    pub value: f64,
}

impl IngestSample {
    /// Checks the fields the aggregator cannot reject on its own.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.owner.trim().is_empty() {
            return Err(AppError::InvalidRequest("owner must not be empty".into()));
        }
        if self.device_id < 0 {
            return Err(AppError::InvalidRequest(format!(
                "Invalid device id: {}",
                self.device_id
            )));
        }
        if self.ts < 0 {
            return Err(AppError::InvalidRequest(format!("Invalid timestamp: {}", self.ts)));
        }
        if !self.value.is_finite() {
            return Err(AppError::InvalidRequest("value must be a finite number".into()));
        }
        Ok(())
    }
}

/// Batch ingestion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub samples: Vec<IngestSample>,
}

/// Batch ingestion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub accepted: usize,
    pub rejected: usize,
}

/// One point of a reporting series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportingPoint {
    pub ts: i64,
    pub value: f64,
}

/// Selection of a single pin's series from one granularity table
#[derive(Debug, Clone, PartialEq)]
pub struct ReportingQuery {
    pub owner: String,
    pub device_id: i32,
    pub pin_type: PinType,
    pub pin: u8,
    pub granularity: Granularity,
    /// Inclusive lower bound, epoch millis
    pub from: i64,
    /// Exclusive upper bound, epoch millis
    pub to: i64,
    pub limit: i64,
}
