use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::models::reading::{KneeReading, NewReading};
use crate::readings::timestamp::RawTimestamp;
use crate::readings::{ingest, query, stats};
use crate::state::AppState;
use crate::users::registry;

/// POST /users/:id/knee-data
pub async fn handle_record_reading(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(reading): Json<NewReading>,
) -> Result<Json<KneeReading>, AppError> {
    let stored = ingest::record_reading(&state.db, user_id, &reading).await?;
    Ok(Json(stored))
}

/// POST /users/:id/knee-data/batch
pub async fn handle_record_batch(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(readings): Json<Vec<NewReading>>,
) -> Result<Json<Vec<KneeReading>>, AppError> {
    let stored = ingest::record_readings_batch(&state.db, user_id, &readings).await?;
    Ok(Json(stored))
}

/// GET /users/:id/knee-data
pub async fn handle_readings_for_id(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<KneeReading>>, AppError> {
    let readings = query::readings_by_user(&state.db, user_id).await?;
    Ok(Json(readings))
}

#[derive(Deserialize)]
pub struct ReceiveDataParams {
    pub username: String,
    pub angle: f64,
    pub rotation: f64,
    /// Optional sensor capture time. This legacy endpoint predates the
    /// timestamp field, so when absent the arrival time is used.
    pub timestamp: Option<String>,
}

/// POST /data?username=...&angle=...&rotation=...[&timestamp=...]
/// Legacy sensor endpoint: resolves (or provisions) the user by name, then
/// ingests one reading.
pub async fn handle_receive_data(
    State(state): State<AppState>,
    Query(params): Query<ReceiveDataParams>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let user = registry::resolve_or_create(&state.db, &params.username).await?;

    let raw_timestamp = match &params.timestamp {
        Some(value) => RawTimestamp::from_query_value(value),
        None => RawTimestamp::arrival_now(),
    };
    let reading = NewReading {
        timestamp: raw_timestamp,
        angle: params.angle,
        rotation: params.rotation,
    };
    ingest::record_reading(&state.db, user.id, &reading).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Data received" })),
    ))
}

#[derive(Deserialize)]
pub struct RecentParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

/// GET /data/:username?limit=N
/// The most recent `limit` readings, oldest-first.
pub async fn handle_recent_readings(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(params): Query<RecentParams>,
) -> Result<Json<Vec<KneeReading>>, AppError> {
    if params.limit < 0 {
        return Err(AppError::Validation("limit must be non-negative".into()));
    }
    let user = registry::find_by_name(&state.db, &username)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User '{username}' not found")))?;

    let readings = query::recent_readings(&state.db, user.id, params.limit).await?;
    Ok(Json(readings))
}

#[derive(Deserialize)]
pub struct RangeParams {
    pub start_time: String,
    pub end_time: String,
}

/// GET /data/range/:username?start_time=...&end_time=...
/// All readings in the inclusive range.
pub async fn handle_readings_in_range(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<KneeReading>>, AppError> {
    let user = registry::find_by_name(&state.db, &username)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User '{username}' not found")))?;

    let start = crate::readings::timestamp::normalize(&RawTimestamp::from_query_value(
        &params.start_time,
    ))?;
    let end =
        crate::readings::timestamp::normalize(&RawTimestamp::from_query_value(&params.end_time))?;

    let readings = query::readings_in_range(&state.db, user.id, start, end).await?;
    Ok(Json(readings))
}

/// GET /data/stats/:username
pub async fn handle_user_stats(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<stats::UserStats>, AppError> {
    let user_stats = stats::user_stats(&state.db, &username).await?;
    Ok(Json(user_stats))
}

/// DELETE /data/:username
/// Removes the user and every reading they own.
pub async fn handle_delete_user_data(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<Value>, AppError> {
    registry::delete_user(&state.db, &username).await?;
    Ok(Json(json!({ "message": "Data deleted" })))
}
