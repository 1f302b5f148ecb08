use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, Query, State},
    http::header,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use vision::codec::DEFAULT_JPEG_QUALITY;
use vision::{Detection, DetectorHandle, DetectorState, Frame, annotate_frame, decode_image, encode_jpeg};

pub const DEFAULT_TARGET_CLASSES: &str = "person,car,truck";

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_classes: Option<Vec<String>>,
    detections: Vec<Detection>,
    count: usize,
}

#[derive(Debug, Deserialize)]
pub struct TargetClassesQuery {
    target_classes: Option<String>,
}

#[derive(Default)]
struct Upload {
    image: Option<Bytes>,
    target_classes: Option<String>,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    let mut upload = Upload::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => upload.image = Some(field.bytes().await?),
            "target_classes" => upload.target_classes = Some(field.text().await?),
            _ => {}
        }
    }

    Ok(upload)
}

fn ensure_ready(detector: &DetectorHandle) -> Result<(), ApiError> {
    match detector.state() {
        DetectorState::Ready => Ok(()),
        DetectorState::Loading => Err(ApiError::DetectorUnavailable("model still loading")),
        DetectorState::Failed(_) => Err(ApiError::DetectorUnavailable("model failed to load")),
    }
}

/// Decodes and runs the detector off the async runtime.
async fn run_detection(
    detector: DetectorHandle,
    image: Option<Bytes>,
) -> Result<(Frame, Vec<Detection>), ApiError> {
    let image = image.ok_or(ApiError::MissingFile)?;

    tokio::task::spawn_blocking(move || {
        let frame = decode_image(&image)?;
        let detections = detector.detect(&frame)?;
        Ok::<_, ApiError>((frame, detections))
    })
    .await
    .map_err(|e| ApiError::Internal(e.into()))?
}

/// Trimmed, lowercased, empty entries dropped.
pub fn parse_target_classes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|class| class.trim().to_lowercase())
        .filter(|class| !class.is_empty())
        .collect()
}

pub async fn detect(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DetectResponse>, ApiError> {
    ensure_ready(&state.detector)?;
    let upload = read_upload(multipart).await?;
    let (_, detections) = run_detection(state.detector.clone(), upload.image).await?;

    tracing::debug!(count = detections.len(), "Detection request served");
    Ok(Json(DetectResponse {
        success: true,
        target_classes: None,
        count: detections.len(),
        detections,
    }))
}

pub async fn detect_annotated(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    ensure_ready(&state.detector)?;
    let upload = read_upload(multipart).await?;
    let (frame, detections) = run_detection(state.detector.clone(), upload.image).await?;

    let jpeg = tokio::task::spawn_blocking(move || {
        let annotated = annotate_frame(&frame, &detections, None);
        encode_jpeg(&annotated, DEFAULT_JPEG_QUALITY)
    })
    .await
    .map_err(|e| ApiError::Internal(e.into()))??;

    Ok(([(header::CONTENT_TYPE, "image/jpeg")], jpeg))
}

pub async fn detect_specific(
    State(state): State<AppState>,
    Query(query): Query<TargetClassesQuery>,
    multipart: Multipart,
) -> Result<Json<DetectResponse>, ApiError> {
    ensure_ready(&state.detector)?;
    let upload = read_upload(multipart).await?;

    let raw = upload
        .target_classes
        .or(query.target_classes)
        .unwrap_or_else(|| DEFAULT_TARGET_CLASSES.to_string());
    let targets = parse_target_classes(&raw);

    let (_, detections) = run_detection(state.detector.clone(), upload.image).await?;
    let detections: Vec<Detection> = detections
        .into_iter()
        .filter(|d| targets.iter().any(|t| d.matches_class(t)))
        .map(|mut d| {
            d.class_label = d.class_label.to_lowercase();
            d
        })
        .collect();

    Ok(Json(DetectResponse {
        success: true,
        count: detections.len(),
        target_classes: Some(targets),
        detections,
    }))
}
