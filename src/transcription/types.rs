//! Engine output types and errors.

use serde::Serialize;
use thiserror::Error;

/// Contiguous transcribed span with timestamps in seconds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    /// Segment text exactly as produced by the engine
    pub text: String,
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
}

impl Segment {
    /// Creates a segment
    pub fn new(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            text: text.into(),
            start,
            end,
        }
    }
}

/// Materialised engine output for one audio file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    /// Segments in playback order
    pub segments: Vec<Segment>,
    /// Detected language code, if the engine reported one
    pub language: Option<String>,
}

impl Transcript {
    /// Joins segment texts: each trimmed, single-space separated, whole result trimmed
    #[must_use]
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|segment| segment.text.trim())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_owned()
    }

    /// Detected language, or `"unknown"` when missing or empty
    #[must_use]
    pub fn language_or_unknown(&self) -> &str {
        self.language
            .as_deref()
            .filter(|lang| !lang.is_empty())
            .unwrap_or("unknown")
    }
}

/// Errors that can occur while loading the engine or transcribing
#[derive(Debug, Error)]
pub enum TranscriptionError {
    /// Failed to load or materialise the Whisper model
    #[error("failed to load whisper model {model}: {source}")]
    ModelLoad {
        /// Model identifier or path
        model: String,
        /// Underlying error
        source: anyhow::Error,
    },

    /// Device selector is not one we know how to map
    #[error("unsupported compute device: {0}")]
    UnsupportedDevice(String),

    /// Precision mode has no matching ggml weight variant
    #[error("unsupported compute type: {0}")]
    UnsupportedComputeType(String),

    /// Failed to create Whisper inference state
    #[error("failed to create whisper state")]
    StateCreation,

    /// Audio container or codec could not be decoded
    #[error("audio decode error: {0}")]
    AudioDecode(String),

    /// Resampling to 16kHz failed
    #[error("resample error: {0}")]
    Resample(String),

    /// Transcription inference failed
    #[error("failed to transcribe audio: {0}")]
    Transcription(#[from] anyhow::Error),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
