use chrono::NaiveDateTime;
use sqlx::PgPool;

use crate::errors::AppError;
use crate::models::reading::KneeReading;

/// Returns the most recent `limit` readings for a user, oldest-first.
///
/// The store hands back newest-first (`ORDER BY recorded_at DESC LIMIT n`);
/// reversing in memory gives callers a chronological series ending at the
/// latest sample, which is what chart clients want.
pub async fn recent_readings(
    pool: &PgPool,
    user_id: i64,
    limit: i64,
) -> Result<Vec<KneeReading>, AppError> {
    let rows: Vec<KneeReading> = sqlx::query_as(
        r#"
        SELECT * FROM knee_readings
        WHERE user_id = $1
        ORDER BY recorded_at DESC
        LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(into_chronological(rows))
}

/// Restores chronological order for a newest-first page: the store hands
/// back the most recent rows descending, callers get the same rows
/// oldest-first.
fn into_chronological(mut rows: Vec<KneeReading>) -> Vec<KneeReading> {
    rows.reverse();
    rows
}

/// Returns all readings with `start <= recorded_at <= end`, inclusive at
/// both bounds. No limit; store default order.
pub async fn readings_in_range(
    pool: &PgPool,
    user_id: i64,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Vec<KneeReading>, AppError> {
    Ok(sqlx::query_as(
        r#"
        SELECT * FROM knee_readings
        WHERE user_id = $1 AND recorded_at >= $2 AND recorded_at <= $3
        "#,
    )
    .bind(user_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?)
}

/// Returns every reading for a numeric user id. No existence check — an
/// absent user simply yields an empty list.
pub async fn readings_by_user(pool: &PgPool, user_id: i64) -> Result<Vec<KneeReading>, AppError> {
    Ok(
        sqlx::query_as("SELECT * FROM knee_readings WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(pool)
            .await?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn reading(id: i64, secs: i64) -> KneeReading {
        KneeReading {
            id,
            user_id: 7,
            recorded_at: NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap()
                + chrono::Duration::seconds(secs),
            angle: 0.0,
            rotation: 0.0,
        }
    }

    #[test]
    fn test_recent_limit_returns_chronological() {
        // Over t1 < t2 < t3 with limit 2 the store pages [t3, t2];
        // callers see [t2, t3].
        let newest_first = vec![reading(3, 3), reading(2, 2)];
        let rows = into_chronological(newest_first);
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 3]);
        assert!(rows[0].recorded_at < rows[1].recorded_at);
    }

    #[test]
    fn test_chronological_of_empty_page() {
        assert!(into_chronological(Vec::new()).is_empty());
    }
}
