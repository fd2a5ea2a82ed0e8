//! End-to-end tests for the HTTP API
//!
//! Most tests drive the router with a stand-in engine that decodes the
//! uploaded scratch file for real, so the multipart → temp file → decode →
//! response path runs without model weights.
//!
//! Tests marked #[ignore] need a ggml model; point `WHISPER_TEST_MODEL` at one and run:
//! cargo test --test http_api_test -- --ignored

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use tower::ServiceExt;
use whisper_server::config::ModelConfig;
use whisper_server::server::{self, AppState};
use whisper_server::transcription::audio::{load_pcm_16k_mono, WHISPER_SAMPLE_RATE};
use whisper_server::transcription::{
    EngineHandle, EngineLoader, Segment, SpeechEngine, Transcript, TranscriptionError,
    WhisperLoader,
};

const BOUNDARY: &str = "integration-boundary";

/// Engine that decodes the file and reports one segment spanning the audio
struct DecodingEngine {
    seen: Arc<Mutex<Vec<PathBuf>>>,
}

impl SpeechEngine for DecodingEngine {
    #[allow(clippy::cast_precision_loss)]
    fn transcribe_file(&self, audio_path: &Path) -> Result<Transcript, TranscriptionError> {
        self.seen
            .lock()
            .map_err(|e| anyhow::anyhow!("poisoned: {e}"))?
            .push(audio_path.to_path_buf());
        let samples = load_pcm_16k_mono(audio_path)?;
        let seconds = samples.len() as f64 / f64::from(WHISPER_SAMPLE_RATE);
        Ok(Transcript {
            segments: vec![Segment::new(" decoded audio ", 0.0, seconds)],
            language: Some("en".to_owned()),
        })
    }
}

struct DecodingLoader {
    seen: Arc<Mutex<Vec<PathBuf>>>,
}

impl EngineLoader for DecodingLoader {
    fn load(&self) -> Result<Arc<dyn SpeechEngine>, TranscriptionError> {
        Ok(Arc::new(DecodingEngine {
            seen: Arc::clone(&self.seen),
        }))
    }
}

fn wav_bytes(sample_rate: u32, seconds: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for _ in 0..sample_rate * seconds {
            writer.write_sample(0_i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

fn upload_request(filename: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: audio/wav\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/v1/audio/transcriptions")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn decoding_state(scratch: &Path, seen: &Arc<Mutex<Vec<PathBuf>>>) -> AppState {
    let loader = DecodingLoader {
        seen: Arc::clone(seen),
    };
    AppState::new(
        Arc::new(EngineHandle::new(Arc::new(loader))),
        "small.en",
        scratch.to_path_buf(),
        16 * 1024 * 1024,
    )
}

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(resp.into_body(), 1_000_000)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_wav_upload_is_decoded_and_cleaned_up() {
    let scratch = tempfile::tempdir().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let app = server::router(decoding_state(scratch.path(), &seen));

    // 44.1kHz input exercises the resampler
    let resp = app
        .oneshot(upload_request("clip.wav", &wav_bytes(44_100, 2)))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let parsed = json_body(resp).await;
    assert_eq!(parsed["text"], "decoded audio");
    assert_eq!(parsed["segments"][0]["text"], " decoded audio ");
    let end = parsed["segments"][0]["end"].as_f64().unwrap();
    assert!((end - 2.0).abs() < 0.05, "end = {end}");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].to_string_lossy().ends_with(".wav"));
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_undecodable_upload_fails_and_is_cleaned_up() {
    let scratch = tempfile::tempdir().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let app = server::router(decoding_state(scratch.path(), &seen));

    let resp = app
        .oneshot(upload_request("notes.txt", b"plain text, not audio"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(resp).await["detail"], "Internal Server Error");
    assert!(seen.lock().unwrap()[0].to_string_lossy().ends_with(".txt"));
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_unsupported_device_reports_model_load_failure() {
    let scratch = tempfile::tempdir().unwrap();
    let models = tempfile::tempdir().unwrap();
    let config = ModelConfig {
        device: "tpu".to_owned(),
        ..ModelConfig::default()
    };
    let loader = WhisperLoader::new(config, models.path().to_path_buf());
    let state = AppState::new(
        Arc::new(EngineHandle::new(Arc::new(loader))),
        "small.en",
        scratch.path().to_path_buf(),
        1024 * 1024,
    );

    let resp = server::router(state)
        .oneshot(upload_request("a.wav", &wav_bytes(16_000, 1)))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let parsed = json_body(resp).await;
    assert_eq!(
        parsed["detail"],
        "Model load failed: unsupported compute device: tpu"
    );
}

#[tokio::test]
async fn test_serves_health_over_tcp() {
    let scratch = tempfile::tempdir().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(server::serve(
        listener,
        decoding_state(scratch.path(), &seen),
        async move {
            stop_rx.await.ok();
        },
    ));

    let url = format!("http://{addr}/health");
    let body = tokio::task::spawn_blocking(move || {
        reqwest::blocking::get(url).and_then(reqwest::blocking::Response::text)
    })
    .await
    .unwrap()
    .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed, serde_json::json!({"status": "ok", "model": "small.en"}));

    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test]
#[ignore = "requires actual model file (set WHISPER_TEST_MODEL)"]
async fn test_real_model_transcribes_silence() {
    let Ok(model) = std::env::var("WHISPER_TEST_MODEL") else {
        return;
    };
    let scratch = tempfile::tempdir().unwrap();
    let models = tempfile::tempdir().unwrap();
    let config = ModelConfig {
        name: model,
        compute_type: "default".to_owned(),
        beam_size: 1,
        ..ModelConfig::default()
    };
    let loader = WhisperLoader::new(config, models.path().to_path_buf());
    let engine = Arc::new(EngineHandle::new(Arc::new(loader)));
    let state = AppState::new(
        Arc::clone(&engine),
        "small.en",
        scratch.path().to_path_buf(),
        16 * 1024 * 1024,
    );

    let resp = server::router(state)
        .oneshot(upload_request("silence", &wav_bytes(16_000, 2)))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let parsed = json_body(resp).await;
    assert!(parsed["text"].is_string());
    assert!(!parsed["language"].as_str().unwrap().is_empty());
    assert!(engine.is_loaded());
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}
