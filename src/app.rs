use std::time::Instant;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::routes::{health, predict};
use crate::state::AppState;

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::<AppState>::new()
        .merge(health::router())
        .merge(predict::router())
        .layer(middleware::from_fn(process_time))
        .layer(cors)
        .with_state(state)
}

/// Adds `X-Process-Time` (seconds) to every response.
async fn process_time(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let mut response = next.run(request).await;
    let elapsed = started.elapsed().as_secs_f64();

    if let Ok(value) = HeaderValue::from_str(&format!("{:.6}", elapsed)) {
        response.headers_mut().insert("X-Process-Time", value);
    }
    info!("Request {} took {:.4}s", path, elapsed);
    response
}
