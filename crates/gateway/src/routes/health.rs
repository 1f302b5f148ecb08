use crate::state::AppState;
use axum::{Json, extract::State};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: String,
    model_loaded: bool,
    model_state: &'static str,
    stream_processing: bool,
    connected_clients: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "running",
        service: state.settings.service_name.clone(),
        model_loaded: state.detector.ready(),
        model_state: state.detector.state().as_str(),
        stream_processing: state.processor.is_running(),
        connected_clients: state.processor.subscriber_count(),
    })
}
