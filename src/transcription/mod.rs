/// Audio decoding to 16kHz mono
pub mod audio;
/// Model download and management
pub mod download;
/// Whisper model inference engine
pub mod engine;
/// Lazily constructed shared engine
pub mod handle;
/// Segments, transcripts and errors
pub mod types;

pub use engine::{SpeechEngine, WhisperEngine};
pub use handle::{EngineHandle, EngineLoader, WhisperLoader};
pub use types::{Segment, Transcript, TranscriptionError};
