pub mod error;
pub mod progress;

use axum::Json;
use axum::Router;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::json;

use crate::AppState;

async fn health_check() -> Response {
    Json(json!({"status": "ok"})).into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/api", get(health_check))
        // Progress routes
        .route("/api/progress/running", get(progress::list_running))
        .route(
            "/api/progress/running/:task_name",
            get(progress::get_running_task),
        )
        .route("/api/progress/events", post(progress::publish_event))
        .with_state(state)
}
