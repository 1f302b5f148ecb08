use crate::error::ApiError;
use crate::state::AppState;
use crate::stream::StreamError;
use axum::{Json, extract::State};
use serde::Serialize;
use serde_json::{Value, json};

#[derive(Debug, Serialize)]
pub struct StreamStatus {
    processing: bool,
    clients: usize,
    model_loaded: bool,
}

pub async fn start_stream(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let processor = state.processor.clone();
    let started = tokio::task::spawn_blocking(move || processor.start())
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;

    match started {
        Ok(()) => Ok(Json(json!({
            "success": true,
            "message": "AI stream processing started",
            "channel_url": state.settings.channel_url,
        }))),
        Err(e @ StreamError::AlreadyRunning) => Ok(Json(json!({
            "success": false,
            "message": e.to_string(),
        }))),
        Err(e @ StreamError::Spawn(_)) => Err(ApiError::Internal(e.into())),
    }
}

pub async fn stop_stream(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let processor = state.processor.clone();
    tokio::task::spawn_blocking(move || processor.stop())
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;

    Ok(Json(json!({
        "success": true,
        "message": "AI stream processing stopped",
    })))
}

pub async fn stream_status(State(state): State<AppState>) -> Json<StreamStatus> {
    Json(StreamStatus {
        processing: state.processor.is_running(),
        clients: state.processor.subscriber_count(),
        model_loaded: state.detector.ready(),
    })
}
