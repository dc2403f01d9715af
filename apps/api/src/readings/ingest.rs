use std::collections::HashMap;

use chrono::NaiveDateTime;
use sqlx::PgPool;
use tracing::info;

use crate::errors::AppError;
use crate::models::reading::{KneeReading, NewReading};
use crate::readings::timestamp;

/// Batch ingestion processes this many readings per existence-check +
/// bulk-insert round trip, bounding both memory and the `= ANY(...)` set
/// handed to Postgres.
pub const CHUNK_SIZE: usize = 1000;

/// A reading with its timestamp already normalized, ready to persist.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedReading {
    pub recorded_at: NaiveDateTime,
    pub angle: f64,
    pub rotation: f64,
}

/// Records a single reading for a user.
///
/// Idempotent on `(user_id, recorded_at)`: if a reading already exists at the
/// normalized timestamp, the pre-existing row is returned unchanged and the
/// incoming measurements are discarded. Deduplication rides on the storage
/// uniqueness constraint (`ON CONFLICT DO NOTHING`), so concurrent ingests of
/// the same key converge on one row instead of racing a read-then-write.
pub async fn record_reading(
    pool: &PgPool,
    user_id: i64,
    reading: &NewReading,
) -> Result<KneeReading, AppError> {
    let recorded_at = timestamp::normalize(&reading.timestamp)?;

    let inserted: Option<KneeReading> = sqlx::query_as(
        r#"
        INSERT INTO knee_readings (user_id, recorded_at, angle, rotation)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id, recorded_at) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(recorded_at)
    .bind(reading.angle)
    .bind(reading.rotation)
    .fetch_optional(pool)
    .await
    .map_err(|e| map_unknown_user(e, user_id))?;

    match inserted {
        Some(row) => Ok(row),
        // Conflict: the reading already exists, return it as-is
        None => fetch_existing(pool, user_id, recorded_at).await,
    }
}

/// Records a batch of readings for a user, processing `CHUNK_SIZE` readings
/// at a time.
///
/// The output has the same length and order as the input: each position
/// holds either the pre-existing row (duplicate timestamp) or the newly
/// created one. Duplicates never raise. Each chunk's inserts commit in one
/// transaction, but chunks are not atomic with each other — a store failure
/// mid-batch leaves earlier chunks committed and surfaces the error, so
/// callers must treat batch ingestion as at-least-once per chunk.
pub async fn record_readings_batch(
    pool: &PgPool,
    user_id: i64,
    readings: &[NewReading],
) -> Result<Vec<KneeReading>, AppError> {
    let mut out = Vec::with_capacity(readings.len());

    for chunk in readings.chunks(CHUNK_SIZE) {
        let normalized = chunk
            .iter()
            .map(|r| {
                Ok(NormalizedReading {
                    recorded_at: timestamp::normalize(&r.timestamp)?,
                    angle: r.angle,
                    rotation: r.rotation,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        let timestamps: Vec<NaiveDateTime> = normalized.iter().map(|r| r.recorded_at).collect();

        // One existence query for the whole chunk
        let existing: Vec<KneeReading> = sqlx::query_as(
            "SELECT * FROM knee_readings WHERE user_id = $1 AND recorded_at = ANY($2)",
        )
        .bind(user_id)
        .bind(&timestamps)
        .fetch_all(pool)
        .await?;

        let mut by_timestamp: HashMap<NaiveDateTime, KneeReading> = existing
            .into_iter()
            .map(|row| (row.recorded_at, row))
            .collect();

        let to_insert = plan_chunk(&normalized, &by_timestamp);

        if !to_insert.is_empty() {
            let ts: Vec<NaiveDateTime> = to_insert.iter().map(|r| r.recorded_at).collect();
            let angles: Vec<f64> = to_insert.iter().map(|r| r.angle).collect();
            let rotations: Vec<f64> = to_insert.iter().map(|r| r.rotation).collect();

            let mut tx = pool.begin().await?;
            let inserted: Vec<KneeReading> = sqlx::query_as(
                r#"
                INSERT INTO knee_readings (user_id, recorded_at, angle, rotation)
                SELECT $1, t, a, r
                FROM UNNEST($2::timestamp[], $3::float8[], $4::float8[]) AS x(t, a, r)
                ON CONFLICT (user_id, recorded_at) DO NOTHING
                RETURNING *
                "#,
            )
            .bind(user_id)
            .bind(&ts)
            .bind(&angles)
            .bind(&rotations)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_unknown_user(e, user_id))?;
            tx.commit().await?;

            for row in inserted {
                by_timestamp.insert(row.recorded_at, row);
            }
        }

        // A concurrent ingest can win the insert between our existence query
        // and the bulk insert; ON CONFLICT skips those rows, so fill holes
        // from the store.
        for reading in &normalized {
            if !by_timestamp.contains_key(&reading.recorded_at) {
                let row = fetch_existing(pool, user_id, reading.recorded_at).await?;
                by_timestamp.insert(reading.recorded_at, row);
            }
        }

        out.extend(assemble_chunk(&normalized, &by_timestamp)?);
    }

    info!(
        "Batch ingest for user {user_id}: {} readings in {} chunk(s)",
        readings.len(),
        readings.len().div_ceil(CHUNK_SIZE)
    );
    Ok(out)
}

/// Decides which readings of a chunk get inserted: those whose timestamp is
/// not already stored, keeping only the first occurrence of each timestamp
/// within the chunk (a single INSERT cannot touch the same key twice, and
/// later in-chunk duplicates resolve to the first row anyway).
fn plan_chunk(
    chunk: &[NormalizedReading],
    existing: &HashMap<NaiveDateTime, KneeReading>,
) -> Vec<NormalizedReading> {
    let mut seen = std::collections::HashSet::new();
    chunk
        .iter()
        .filter(|r| !existing.contains_key(&r.recorded_at) && seen.insert(r.recorded_at))
        .copied()
        .collect()
}

/// Rebuilds a chunk's results in input order from the timestamp lookup.
/// Every position resolves to the row stored at its timestamp, whether
/// pre-existing, freshly inserted, or backfilled after a lost race —
/// duplicates land on the same row.
fn assemble_chunk(
    chunk: &[NormalizedReading],
    by_timestamp: &HashMap<NaiveDateTime, KneeReading>,
) -> Result<Vec<KneeReading>, AppError> {
    chunk
        .iter()
        .map(|reading| {
            by_timestamp
                .get(&reading.recorded_at)
                .cloned()
                .ok_or_else(|| {
                    AppError::Internal(anyhow::anyhow!(
                        "reading for {} missing after chunk insert",
                        reading.recorded_at
                    ))
                })
        })
        .collect()
}

/// A foreign-key violation on `user_id` means the caller addressed a user
/// that does not exist; surface that as 404 rather than a store failure.
fn map_unknown_user(err: sqlx::Error, user_id: i64) -> AppError {
    if let sqlx::Error::Database(db) = &err {
        if db.constraint() == Some("knee_readings_user_id_fkey") {
            return AppError::NotFound(format!("User {user_id} not found"));
        }
    }
    err.into()
}

async fn fetch_existing(
    pool: &PgPool,
    user_id: i64,
    recorded_at: NaiveDateTime,
) -> Result<KneeReading, AppError> {
    Ok(sqlx::query_as(
        "SELECT * FROM knee_readings WHERE user_id = $1 AND recorded_at = $2",
    )
    .bind(user_id)
    .bind(recorded_at)
    .fetch_one(pool)
    .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(secs: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
            + chrono::Duration::seconds(secs)
    }

    fn sample(secs: i64, angle: f64) -> NormalizedReading {
        NormalizedReading {
            recorded_at: at(secs),
            angle,
            rotation: 0.0,
        }
    }

    fn stored(secs: i64) -> KneeReading {
        row(1, sample(secs, 0.0))
    }

    fn row(id: i64, reading: NormalizedReading) -> KneeReading {
        KneeReading {
            id,
            user_id: 7,
            recorded_at: reading.recorded_at,
            angle: reading.angle,
            rotation: reading.rotation,
        }
    }

    #[test]
    fn test_plan_inserts_everything_when_store_empty() {
        let chunk = vec![sample(0, 10.0), sample(1, 20.0), sample(2, 30.0)];
        let plan = plan_chunk(&chunk, &HashMap::new());
        assert_eq!(plan, chunk);
    }

    #[test]
    fn test_plan_skips_already_stored_timestamps() {
        let chunk = vec![sample(0, 10.0), sample(1, 20.0)];
        let existing = HashMap::from([(at(0), stored(0))]);
        let plan = plan_chunk(&chunk, &existing);
        assert_eq!(plan, vec![sample(1, 20.0)]);
    }

    #[test]
    fn test_plan_keeps_first_occurrence_of_in_chunk_duplicate() {
        // Same timestamp twice in one chunk: only the first survives,
        // otherwise the bulk INSERT would hit its own key twice.
        let chunk = vec![sample(0, 10.0), sample(0, 99.0), sample(1, 20.0)];
        let plan = plan_chunk(&chunk, &HashMap::new());
        assert_eq!(plan, vec![sample(0, 10.0), sample(1, 20.0)]);
    }

    #[test]
    fn test_plan_empty_when_all_duplicates() {
        let chunk = vec![sample(0, 10.0), sample(1, 20.0)];
        let existing = HashMap::from([(at(0), stored(0)), (at(1), stored(1))]);
        assert!(plan_chunk(&chunk, &existing).is_empty());
    }

    #[test]
    fn test_chunk_count_boundary() {
        // 1000 readings is one chunk; 1001 spills into a second.
        assert_eq!((1000usize).div_ceil(CHUNK_SIZE), 1);
        assert_eq!((1001usize).div_ceil(CHUNK_SIZE), 2);
    }

    #[test]
    fn test_batch_order_preserved_across_chunk_boundary() {
        // 1001 readings spanning two chunks, every tenth one repeating the
        // previous timestamp. Drives the batch loop's decision path against
        // an in-memory store: plan chooses the inserts, the lookup absorbs
        // them, assembly rebuilds each chunk in input order.
        let readings: Vec<NormalizedReading> = (0..1001)
            .map(|i| {
                let t = if i % 10 == 9 { i - 1 } else { i };
                sample(t, i as f64)
            })
            .collect();

        let mut store: HashMap<NaiveDateTime, KneeReading> = HashMap::new();
        let mut next_id = 1;
        let mut out = Vec::new();
        for chunk in readings.chunks(CHUNK_SIZE) {
            for planned in plan_chunk(chunk, &store) {
                store.insert(planned.recorded_at, row(next_id, planned));
                next_id += 1;
            }
            out.extend(assemble_chunk(chunk, &store).unwrap());
        }

        assert_eq!(out.len(), readings.len());
        for (reading, result) in readings.iter().zip(&out) {
            assert_eq!(result.recorded_at, reading.recorded_at);
        }
        // A duplicate position resolves to the pre-existing row, keeping
        // the measurements that arrived first.
        assert_eq!(out[9].id, out[8].id);
        assert_eq!(out[9].angle, 8.0);
    }

    #[test]
    fn test_assemble_preserves_chunk_order() {
        let chunk = vec![sample(2, 30.0), sample(0, 10.0), sample(1, 20.0)];
        let store: HashMap<NaiveDateTime, KneeReading> = chunk
            .iter()
            .enumerate()
            .map(|(i, r)| (r.recorded_at, row(i as i64 + 1, *r)))
            .collect();
        let out = assemble_chunk(&chunk, &store).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(
            out.iter().map(|r| r.recorded_at).collect::<Vec<_>>(),
            chunk.iter().map(|r| r.recorded_at).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_assemble_errors_on_missing_timestamp() {
        let chunk = vec![sample(0, 1.0)];
        assert!(assemble_chunk(&chunk, &HashMap::new()).is_err());
    }
}
