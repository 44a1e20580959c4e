//! Reporting series API endpoint

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::{AppError, Result};
use crate::models::{Granularity, PinType, ReportingPoint, ReportingQuery};
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 1_000;
const MAX_LIMIT: i64 = 10_000;

/// Path segments identifying one pin
#[derive(Debug, Deserialize)]
pub struct SeriesPath {
    pub owner: String,
    pub device_id: i32,
    pub pin_type: PinType,
    pub pin: u8,
}

/// Query parameters for the series endpoint
#[derive(Debug, Deserialize)]
pub struct SeriesParams {
    /// "minute", "hourly" or "daily" (default: minute)
    #[serde(default = "default_granularity")]
    pub granularity: Granularity,
    /// Start, epoch millis inclusive (defaults to 6 hours ago)
    pub from: Option<i64>,
    /// End, epoch millis exclusive (defaults to now)
    pub to: Option<i64>,
    /// Maximum points (default: 1000, max: 10000)
    pub limit: Option<i64>,
}

fn default_granularity() -> Granularity {
    Granularity::Minute
}

/// Response for the series endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct SeriesResponse {
    pub owner: String,
    pub device_id: i32,
    pub pin_type: PinType,
    pub pin: u8,
    pub granularity: Granularity,
    pub from: i64,
    pub to: i64,
    pub points: Vec<ReportingPoint>,
}

/// GET /api/v1/reporting/{owner}/{device_id}/{pin_type}/{pin}
///
/// Returns the stored averages of one pin, oldest first.
pub async fn get_series(
    State(state): State<AppState>,
    Path(path): Path<SeriesPath>,
    Query(params): Query<SeriesParams>,
) -> Result<Json<SeriesResponse>> {
    let now = Utc::now();
    let from = params
        .from
        .unwrap_or_else(|| (now - Duration::hours(6)).timestamp_millis());
    let to = params.to.unwrap_or_else(|| now.timestamp_millis());

    if from >= to {
        return Err(AppError::InvalidRequest("'from' must be before 'to'".into()));
    }

    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if limit <= 0 {
        return Err(AppError::InvalidRequest("'limit' must be positive".into()));
    }

    let query = ReportingQuery {
        owner: path.owner,
        device_id: path.device_id,
        pin_type: path.pin_type,
        pin: path.pin,
        granularity: params.granularity,
        from,
        to,
        limit: limit.min(MAX_LIMIT),
    };

    let records = state.store.select(&query).await?;

    Ok(Json(SeriesResponse {
        owner: query.owner,
        device_id: query.device_id,
        pin_type: query.pin_type,
        pin: query.pin,
        granularity: query.granularity,
        from,
        to,
        points: codec::from_query(records),
    }))
}
