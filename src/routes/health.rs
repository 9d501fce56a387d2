use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tracing::info;

use crate::models::HealthResponse;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    info!("GET / - Health check");
    let status = if state.model.is_loaded() {
        "API is running and the model is loaded."
    } else {
        "WARNING: API is up, but the model artifacts are not loaded."
    };
    Json(HealthResponse {
        status: status.to_string(),
    })
}
