use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::readings::timestamp::RawTimestamp;

/// One stored angle/rotation sample for a user. `recorded_at` is the sensor
/// capture time (timezone-naive), not the insertion time, and is unique per
/// user — it is the deduplication key.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct KneeReading {
    pub id: i64,
    pub user_id: i64,
    #[serde(rename = "timestamp")]
    pub recorded_at: NaiveDateTime,
    pub angle: f64,
    pub rotation: f64,
}

/// Ingestion payload: a raw (not yet normalized) timestamp plus the two
/// measurements. The timestamp may arrive as epoch seconds or an ISO-8601
/// string; normalization happens in the ingestion service.
#[derive(Debug, Clone, Deserialize)]
pub struct NewReading {
    pub timestamp: RawTimestamp,
    pub angle: f64,
    pub rotation: f64,
}
