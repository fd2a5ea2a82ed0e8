use anyhow::Context;
use std::path::Path;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::audio;
use super::types::{Segment, Transcript, TranscriptionError};

/// Speech-to-text engine operating on audio files
///
/// The HTTP layer only sees this trait; [`WhisperEngine`] is the production
/// implementation and `MockSpeechEngine` (via `mockall`) stands in for tests.
#[cfg_attr(test, mockall::automock)]
pub trait SpeechEngine: Send + Sync {
    /// Transcribe the audio file at `audio_path`
    ///
    /// # Errors
    /// Returns error if the file can't be decoded or inference fails
    fn transcribe_file(&self, audio_path: &Path) -> Result<Transcript, TranscriptionError>;
}

/// Whisper transcription engine
pub struct WhisperEngine {
    /// Loaded model; each call creates its own inference state
    ctx: WhisperContext,
    /// Number of CPU threads for inference
    threads: i32,
    /// Beam search width
    beam_size: i32,
    /// Language code (None = auto-detect)
    language: Option<String>,
}

impl WhisperEngine {
    /// Determines sampling strategy based on beam size (pure, testable)
    const fn get_sampling_strategy(beam_size: i32) -> SamplingStrategy {
        if beam_size > 1 {
            SamplingStrategy::BeamSearch {
                beam_size,
                patience: -1.0,
            }
        } else {
            SamplingStrategy::Greedy { best_of: 1 }
        }
    }

    /// Creates a new `WhisperEngine` by loading the ggml model at `model_path`
    ///
    /// # Errors
    /// Returns error if model file doesn't exist, is invalid, or if `threads`/`beam_size` are 0 or exceed `i32::MAX`
    pub fn new(
        model_path: &Path,
        use_gpu: bool,
        threads: usize,
        beam_size: usize,
        language: Option<String>,
    ) -> Result<Self, TranscriptionError> {
        let load_error = |source: anyhow::Error| TranscriptionError::ModelLoad {
            model: model_path.display().to_string(),
            source,
        };

        if threads == 0 {
            return Err(load_error(anyhow::anyhow!("threads must be > 0")));
        }
        if beam_size == 0 {
            return Err(load_error(anyhow::anyhow!("beam_size must be > 0")));
        }

        // whisper-rs takes these as i32
        let threads_i32 = i32::try_from(threads)
            .map_err(|_| load_error(anyhow::anyhow!("threads value too large (max: {})", i32::MAX)))?;
        let beam_size_i32 = i32::try_from(beam_size).map_err(|_| {
            load_error(anyhow::anyhow!(
                "beam_size value too large (max: {})",
                i32::MAX
            ))
        })?;

        tracing::info!(
            path = %model_path.display(),
            use_gpu,
            threads,
            beam_size,
            language = ?language,
            "loading whisper model"
        );

        let path_str = model_path
            .to_str()
            .ok_or_else(|| load_error(anyhow::anyhow!("model path contains invalid UTF-8")))?;

        let mut params = WhisperContextParameters::default();
        params.use_gpu(use_gpu);
        let ctx = WhisperContext::new_with_params(path_str, params)
            .map_err(|e| load_error(anyhow::anyhow!("{e:?}")))?;

        tracing::info!("whisper model loaded successfully");

        Ok(Self {
            ctx,
            threads: threads_i32,
            beam_size: beam_size_i32,
            language,
        })
    }

    /// Transcribes 16kHz mono f32 samples into timed segments
    ///
    /// # Errors
    /// Returns error if state creation or Whisper inference fails
    pub fn transcribe_samples(&self, audio_data: &[f32]) -> Result<Transcript, TranscriptionError> {
        let _span = tracing::debug_span!("transcription", samples = audio_data.len()).entered();

        if audio_data.is_empty() {
            tracing::debug!("no samples, returning empty transcript");
            return Ok(Transcript::default());
        }

        let mut state = self
            .ctx
            .create_state()
            .map_err(|_| TranscriptionError::StateCreation)?;

        let strategy = Self::get_sampling_strategy(self.beam_size);
        let mut params = FullParams::new(strategy);
        params.set_n_threads(self.threads);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_language(self.language.as_deref()); // None = auto-detect
        params.set_translate(false);

        let start = std::time::Instant::now();
        state
            .full(params, audio_data)
            .context("whisper inference failed")?;
        let inference_duration = start.elapsed();

        let segments: Vec<Segment> = state
            .as_iter()
            .map(|segment| {
                Segment::new(
                    segment.to_string(),
                    centis_to_secs(segment.start_timestamp()),
                    centis_to_secs(segment.end_timestamp()),
                )
            })
            .collect();

        let language = whisper_rs::get_lang_str(state.full_lang_id_from_state()).map(str::to_owned);

        tracing::info!(
            segments = segments.len(),
            language = ?language,
            inference_ms = inference_duration.as_millis(),
            "transcription completed"
        );

        Ok(Transcript { segments, language })
    }
}

impl SpeechEngine for WhisperEngine {
    fn transcribe_file(&self, audio_path: &Path) -> Result<Transcript, TranscriptionError> {
        let samples = audio::load_pcm_16k_mono(audio_path)?;
        self.transcribe_samples(&samples)
    }
}

/// whisper.cpp reports timestamps in centiseconds
#[allow(clippy::cast_precision_loss)]
fn centis_to_secs(centis: i64) -> f64 {
    centis as f64 / 100.0
}
