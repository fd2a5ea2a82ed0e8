//! HTTP boundary errors.

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::transcription::TranscriptionError;

/// Errors surfaced by the HTTP handlers
#[derive(Debug, Error)]
pub enum ApiError {
    /// Engine could not be constructed
    #[error("Model load failed: {0}")]
    EngineUnavailable(#[source] TranscriptionError),

    /// Upload could not be persisted to scratch storage
    #[error("upload i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// Decoding or inference failed
    #[error("transcription failed: {0}")]
    Transcription(#[source] TranscriptionError),

    /// Blocking worker panicked or was cancelled
    #[error("transcription worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    /// Request had no `file` part
    #[error("field required: file")]
    MissingFile,

    /// `file` part was a plain form value rather than an uploaded file
    #[error("field file: expected an uploaded file")]
    NotAnUpload,

    /// Malformed multipart body
    #[error(transparent)]
    Multipart(#[from] MultipartError),
}

impl ApiError {
    /// HTTP status for this error
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::EngineUnavailable(_) | Self::Io(_) | Self::Transcription(_) | Self::Worker(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::MissingFile | Self::NotAnUpload => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Multipart(e) => e.status(),
        }
    }

    /// Message shown to the caller; only engine-load failures expose their cause
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::EngineUnavailable(_) | Self::MissingFile | Self::NotAnUpload => {
                self.to_string()
            }
            Self::Multipart(e) => e.body_text(),
            Self::Io(_) | Self::Transcription(_) | Self::Worker(_) => {
                "Internal Server Error".to_owned()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "rejected request");
        }
        (status, Json(json!({ "detail": self.detail() }))).into_response()
    }
}
