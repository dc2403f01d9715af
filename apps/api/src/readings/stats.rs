use std::collections::HashMap;

use serde::Serialize;
use sqlx::PgPool;

use crate::errors::AppError;
use crate::readings::query;
use crate::users::registry;

/// Four-number summary of one measured field.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldSummary {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Serialize)]
pub struct UserStats {
    pub username: String,
    pub stats: HashMap<String, FieldSummary>,
}

/// Computes per-field statistics over a user's full reading history.
///
/// Errors with `NotFound` for an unknown username and `NoData` when the
/// user has no readings at all.
pub async fn user_stats(pool: &PgPool, username: &str) -> Result<UserStats, AppError> {
    let user = registry::find_by_name(pool, username)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User '{username}' not found")))?;

    let readings = query::readings_by_user(pool, user.id).await?;
    let angles: Vec<f64> = readings.iter().map(|r| r.angle).collect();
    let rotations: Vec<f64> = readings.iter().map(|r| r.rotation).collect();

    // Zero readings means no summaries at all; there is no zero-filled
    // placeholder stat.
    let (Some(angle), Some(rotation)) = (summarize(&angles), summarize(&rotations)) else {
        return Err(AppError::NoData(format!(
            "No data found for user '{username}'"
        )));
    };

    Ok(UserStats {
        username: username.to_string(),
        stats: HashMap::from([
            ("angle".to_string(), angle),
            ("rotation".to_string(), rotation),
        ]),
    })
}

/// Mean, sample standard deviation (N-1 denominator), min and max of a
/// non-empty series. A single sample reports std 0.0 rather than the
/// undefined N-1 form, so NaN never reaches a response. Returns `None` for
/// an empty series; callers surface that as `NoData`.
pub fn summarize(values: &[f64]) -> Option<FieldSummary> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = if values.len() < 2 {
        0.0
    } else {
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        variance.sqrt()
    };
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    Some(FieldSummary {
        mean,
        std,
        min,
        max,
    })
}
