mod detect;
mod health;
mod stream;
mod ws;

use crate::state::AppState;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

pub fn router(state: AppState) -> Router {
    let max_upload_bytes = state.settings.max_upload_bytes;

    Router::new()
        .route("/", get(health::health_check))
        .route("/stream/start", post(stream::start_stream))
        .route("/stream/stop", post(stream::stop_stream))
        .route("/stream/status", get(stream::stream_status))
        .route("/stream/ws", get(ws::ws_handler))
        .route("/detect", post(detect::detect))
        .route("/detect-annotated", post(detect::detect_annotated))
        .route("/detect-specific", post(detect::detect_specific))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
