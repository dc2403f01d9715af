pub mod health;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::readings::handlers as reading_handlers;
use crate::state::AppState;
use crate::users::handlers as user_handlers;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // User registry
        .route("/users", post(user_handlers::handle_create_user))
        .route("/users", get(user_handlers::handle_list_users))
        .route("/users/:id", get(user_handlers::handle_get_user))
        // Ingestion + per-id queries
        .route(
            "/users/:id/knee-data",
            post(reading_handlers::handle_record_reading),
        )
        .route(
            "/users/:id/knee-data/batch",
            post(reading_handlers::handle_record_batch),
        )
        .route(
            "/users/:id/knee-data",
            get(reading_handlers::handle_readings_for_id),
        )
        // Legacy sensor endpoints, keyed by username
        .route("/data", post(reading_handlers::handle_receive_data))
        .route(
            "/data/:username",
            get(reading_handlers::handle_recent_readings),
        )
        .route(
            "/data/range/:username",
            get(reading_handlers::handle_readings_in_range),
        )
        .route(
            "/data/stats/:username",
            get(reading_handlers::handle_user_stats),
        )
        .route(
            "/data/:username",
            delete(reading_handlers::handle_delete_user_data),
        )
        .with_state(state)
}
