use sqlx::PgPool;
use tracing::info;

use crate::errors::{is_unique_violation, AppError};
use crate::models::user::{NewUser, User};

/// Creates a user. Usernames are globally unique; registering a taken name
/// is a validation error rather than a second row.
pub async fn create_user(pool: &PgPool, new_user: &NewUser) -> Result<User, AppError> {
    let result: Result<User, sqlx::Error> = sqlx::query_as(
        "INSERT INTO users (name, password, email) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(&new_user.name)
    .bind(&new_user.password)
    .bind(&new_user.email)
    .fetch_one(pool)
    .await;

    match result {
        Ok(user) => {
            info!("Created user '{}' (id {})", user.name, user.id);
            Ok(user)
        }
        Err(e) if is_unique_violation(&e, "users_name_key") => Err(AppError::Validation(format!(
            "Username '{}' is already taken",
            new_user.name
        ))),
        Err(e) => Err(e.into()),
    }
}

pub async fn list_users(pool: &PgPool) -> Result<Vec<User>, AppError> {
    Ok(sqlx::query_as("SELECT * FROM users ORDER BY id")
        .fetch_all(pool)
        .await?)
}

pub async fn get_user(pool: &PgPool, id: i64) -> Result<Option<User>, AppError> {
    Ok(sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?)
}

pub async fn find_by_name(pool: &PgPool, name: &str) -> Result<Option<User>, AppError> {
    Ok(sqlx::query_as("SELECT * FROM users WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?)
}

/// Resolves a username to a user, provisioning a placeholder (empty
/// password and email) when none exists. This is the only auto-creation
/// path in the service; everything except the legacy `POST /data` endpoint
/// requires users to exist already, so a typoed username there is a 404
/// instead of a fresh account.
///
/// Two concurrent first-writes for the same name race on the insert; the
/// loser hits the unique name constraint and re-reads the winner's row.
pub async fn resolve_or_create(pool: &PgPool, name: &str) -> Result<User, AppError> {
    if let Some(user) = find_by_name(pool, name).await? {
        return Ok(user);
    }

    let inserted: Result<User, sqlx::Error> = sqlx::query_as(
        "INSERT INTO users (name, password, email) VALUES ($1, '', '') RETURNING *",
    )
    .bind(name)
    .fetch_one(pool)
    .await;

    match inserted {
        Ok(user) => {
            info!("Auto-provisioned user '{}' (id {})", user.name, user.id);
            Ok(user)
        }
        Err(e) if is_unique_violation(&e, "users_name_key") => {
            find_by_name(pool, name).await?.ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!("user '{name}' vanished after name conflict"))
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Deletes a user and all of their readings in one transaction. The schema
/// carries no cascade, so the readings go first.
pub async fn delete_user(pool: &PgPool, name: &str) -> Result<(), AppError> {
    let user = find_by_name(pool, name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User '{name}' not found")))?;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM knee_readings WHERE user_id = $1")
        .bind(user.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!("Deleted user '{}' (id {}) and readings", user.name, user.id);
    Ok(())
}
