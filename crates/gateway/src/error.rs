use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use vision::{CodecError, DetectorError};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Model not loaded: {0}")]
    DetectorUnavailable(&'static str),

    #[error("Invalid image format")]
    InvalidImage(#[source] CodecError),

    #[error("No image file in upload (expected multipart field `file`)")]
    MissingFile,

    #[error("Malformed upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error("{0:#}")]
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::DetectorUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InvalidImage(_) | ApiError::MissingFile => StatusCode::BAD_REQUEST,
            ApiError::Multipart(e) => e.status(),
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DetectorError> for ApiError {
    fn from(e: DetectorError) -> Self {
        match e {
            DetectorError::Unavailable(reason) => ApiError::DetectorUnavailable(reason),
            DetectorError::Inference(inner) => ApiError::Internal(inner.context("Detection failed")),
        }
    }
}

impl From<CodecError> for ApiError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Encode(_) => ApiError::Internal(e.into()),
            CodecError::Empty | CodecError::Decode(_) => ApiError::InvalidImage(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        (
            status,
            Json(json!({ "success": false, "detail": self.to_string() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(
            ApiError::DetectorUnavailable("model still loading").status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(CodecError::Empty).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::MissingFile.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(DetectorError::Inference(anyhow::anyhow!("boom"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn unavailable_detail_mentions_model() {
        let err = ApiError::from(DetectorError::Unavailable("model still loading"));
        assert_eq!(err.to_string(), "Model not loaded: model still loading");
    }
}
