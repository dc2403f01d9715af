use axum::{
    extract::{Path, State},
    Json,
};

use crate::errors::AppError;
use crate::models::user::{NewUser, User};
use crate::state::AppState;
use crate::users::registry;

/// POST /users
pub async fn handle_create_user(
    State(state): State<AppState>,
    Json(new_user): Json<NewUser>,
) -> Result<Json<User>, AppError> {
    let user = registry::create_user(&state.db, &new_user).await?;
    Ok(Json(user))
}

/// GET /users
pub async fn handle_list_users(
    State(state): State<AppState>,
) -> Result<Json<Vec<User>>, AppError> {
    let users = registry::list_users(&state.db).await?;
    Ok(Json(users))
}

/// GET /users/:id
/// Returns the user or JSON `null` when the id is unknown.
pub async fn handle_get_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Option<User>>, AppError> {
    let user = registry::get_user(&state.db, id).await?;
    Ok(Json(user))
}
