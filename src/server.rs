//! Axum HTTP surface: health, service info and the transcription endpoint.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::transcription::{EngineHandle, Segment, SpeechEngine, Transcript};

/// Suffix for uploads whose filename has no extension
const DEFAULT_SUFFIX: &str = ".wav";

/// Shared state accessible from Axum handlers
#[derive(Clone)]
pub struct AppState {
    /// Lazily constructed engine
    pub engine: Arc<EngineHandle>,
    /// Configured model identifier, reported by `/health` and `/`
    pub model_id: Arc<str>,
    /// Directory for per-request upload files
    pub scratch_dir: Arc<Path>,
    /// Request body limit
    pub max_upload_bytes: usize,
}

impl AppState {
    /// Creates handler state
    pub fn new(
        engine: Arc<EngineHandle>,
        model_id: &str,
        scratch_dir: PathBuf,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            engine,
            model_id: Arc::from(model_id),
            scratch_dir: Arc::from(scratch_dir),
            max_upload_bytes,
        }
    }
}

/// `GET /health` body
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"`
    pub status: &'static str,
    /// Configured model identifier
    pub model: String,
}

/// `GET /` body
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    /// Always `"whisper"`
    pub service: &'static str,
    /// Configured model identifier
    pub model: String,
}

/// `POST /v1/audio/transcriptions` body
#[derive(Debug, Serialize)]
pub struct TranscriptionResponse {
    /// Trimmed, space-joined segment text
    pub text: String,
    /// Model name as requested by the caller (echo only)
    pub model: String,
    /// Detected language or `"unknown"`
    pub language: String,
    /// Segments with untrimmed text
    pub segments: Vec<Segment>,
}

impl TranscriptionResponse {
    /// Shapes engine output into the response; both text and segments come from one list
    pub fn new(transcript: Transcript, model: String) -> Self {
        Self {
            text: transcript.full_text(),
            language: transcript.language_or_unknown().to_owned(),
            model,
            segments: transcript.segments,
        }
    }
}

/// Query parameters accepted by the transcription endpoint
#[derive(Debug, Default, Deserialize)]
pub struct TranscribeParams {
    /// Requested model name, echoed back
    pub model: Option<String>,
}

/// Uploaded audio, fully buffered
#[derive(Debug, Clone)]
pub struct Upload {
    /// Client-supplied filename
    pub filename: Option<String>,
    /// File contents
    pub bytes: Bytes,
}

#[derive(Debug, Default)]
struct TranscriptionForm {
    file: Option<Upload>,
    model: Option<String>,
}

/// Build the Axum router with all routes
pub fn router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes;
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/v1/audio/transcriptions", post(transcribe_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
}

/// Serve until `shutdown` resolves
///
/// # Errors
/// Returns error if the listener fails
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model: state.model_id.to_string(),
    })
}

/// GET /
async fn root_handler(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "whisper",
        model: state.model_id.to_string(),
    })
}

/// POST /v1/audio/transcriptions
async fn transcribe_handler(
    State(state): State<AppState>,
    Query(params): Query<TranscribeParams>,
    multipart: Multipart,
) -> Result<Json<TranscriptionResponse>, ApiError> {
    let form = read_form(multipart).await?;
    let upload = form.file.ok_or(ApiError::MissingFile)?;
    let model = form
        .model
        .or(params.model)
        .unwrap_or_else(|| state.model_id.to_string());

    let engine = state
        .engine
        .get()
        .await
        .map_err(ApiError::EngineUnavailable)?;

    tracing::debug!(
        filename = ?upload.filename,
        bytes = upload.bytes.len(),
        model = %model,
        "transcription request"
    );

    let scratch_dir = Arc::clone(&state.scratch_dir);
    let transcript = tokio::task::spawn_blocking(move || {
        persist_and_transcribe(engine.as_ref(), &scratch_dir, &upload)
    })
    .await??;

    Ok(Json(TranscriptionResponse::new(transcript, model)))
}

async fn read_form(mut multipart: Multipart) -> Result<TranscriptionForm, ApiError> {
    let mut form = TranscriptionForm::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let Some(filename) = field.file_name().map(str::to_owned) else {
                    return Err(ApiError::NotAnUpload);
                };
                let bytes = field.bytes().await?;
                form.file = Some(Upload {
                    filename: Some(filename),
                    bytes,
                });
            }
            Some("model") => form.model = Some(field.text().await?),
            _ => {}
        }
    }
    Ok(form)
}

/// Extension of `filename` as a `.ext` suffix, or `.wav`
pub fn upload_suffix(filename: Option<&str>) -> String {
    filename
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map_or_else(|| DEFAULT_SUFFIX.to_owned(), |ext| format!(".{ext}"))
}

/// Writes the upload to a unique scratch file, transcribes it and removes the file
///
/// The scratch file is removed whether or not transcription succeeds; a
/// failed removal is logged and ignored.
///
/// # Errors
/// Returns [`ApiError::Io`] if the scratch file can't be written and
/// [`ApiError::Transcription`] if the engine fails
pub fn persist_and_transcribe(
    engine: &dyn SpeechEngine,
    scratch_dir: &Path,
    upload: &Upload,
) -> Result<Transcript, ApiError> {
    let suffix = upload_suffix(upload.filename.as_deref());
    let mut scratch = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(&suffix)
        .tempfile_in(scratch_dir)?;
    scratch.write_all(&upload.bytes)?;
    scratch.flush()?;

    let result = engine.transcribe_file(scratch.path());

    let path = scratch.path().to_path_buf();
    if let Err(e) = scratch.close() {
        tracing::debug!(path = %path.display(), error = %e, "failed to remove scratch file");
    }

    result.map_err(ApiError::Transcription)
}
