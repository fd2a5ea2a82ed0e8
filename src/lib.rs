//! Whisper Server - OpenAI-compatible speech-to-text over HTTP
//!
//! This library exports core modules for testing and potential future reuse.

/// Configuration management
pub mod config;
/// HTTP error mapping
pub mod error;
/// Axum router and handlers
pub mod server;
/// Logging setup
pub mod telemetry;
/// Whisper transcription engine
pub mod transcription;
