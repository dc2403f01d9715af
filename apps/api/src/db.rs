use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Creates and returns a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    info!("PostgreSQL connection pool established");
    Ok(pool)
}

/// Creates the tables at startup if they do not exist yet.
///
/// The `(user_id, recorded_at)` uniqueness constraint is the deduplication
/// key for ingestion: a conflicting insert is the "already exists" signal,
/// so concurrent same-key writes converge on a single row. There is
/// deliberately no `ON DELETE CASCADE` — user deletion removes readings in
/// the service layer inside one transaction.
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL,
            email TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knee_readings (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL REFERENCES users (id),
            recorded_at TIMESTAMP NOT NULL,
            angle DOUBLE PRECISION NOT NULL,
            rotation DOUBLE PRECISION NOT NULL,
            UNIQUE (user_id, recorded_at)
        )
        "#,
    )
    .execute(pool)
    .await?;

    info!("Database schema ready");
    Ok(())
}
