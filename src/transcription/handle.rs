use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::OnceCell;

use super::download;
use super::engine::{SpeechEngine, WhisperEngine};
use super::types::TranscriptionError;
use crate::config::ModelConfig;

/// Builds the speech engine on first use
#[cfg_attr(test, mockall::automock)]
pub trait EngineLoader: Send + Sync {
    /// Construct a fresh engine (blocking; may download weights)
    ///
    /// # Errors
    /// Returns error if the weights can't be materialised or loaded
    fn load(&self) -> Result<Arc<dyn SpeechEngine>, TranscriptionError>;
}

/// Shared, lazily constructed engine
///
/// Concurrent first callers wait on a single construction. A failed
/// construction leaves the handle empty, so the next call tries again.
/// Construction runs in its own task, so a caller that goes away mid-load
/// does not release the cell to a second loader.
pub struct EngineHandle {
    loader: Arc<dyn EngineLoader>,
    engine: Arc<OnceCell<Arc<dyn SpeechEngine>>>,
}

impl EngineHandle {
    /// Creates an empty handle that will build its engine with `loader`
    pub fn new(loader: Arc<dyn EngineLoader>) -> Self {
        Self {
            loader,
            engine: Arc::new(OnceCell::new()),
        }
    }

    /// Returns the engine, constructing it on the blocking pool if needed
    ///
    /// # Errors
    /// Returns the construction error; nothing is cached in that case
    pub async fn get(&self) -> Result<Arc<dyn SpeechEngine>, TranscriptionError> {
        if let Some(engine) = self.engine.get() {
            return Ok(Arc::clone(engine));
        }

        let cell = Arc::clone(&self.engine);
        let loader = Arc::clone(&self.loader);
        tokio::spawn(async move {
            let engine = cell
                .get_or_try_init(|| async move {
                    let start = std::time::Instant::now();
                    let engine = tokio::task::spawn_blocking(move || loader.load())
                        .await
                        .map_err(|e| loader_task_failed(&e))??;
                    tracing::info!(load_ms = start.elapsed().as_millis(), "engine ready");
                    Ok::<_, TranscriptionError>(engine)
                })
                .await?;
            Ok::<_, TranscriptionError>(Arc::clone(engine))
        })
        .await
        .map_err(|e| loader_task_failed(&e))?
    }

    /// Whether the engine has been constructed
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.engine.initialized()
    }
}

fn loader_task_failed(e: &tokio::task::JoinError) -> TranscriptionError {
    TranscriptionError::ModelLoad {
        model: "engine loader".to_owned(),
        source: anyhow::anyhow!("loader task failed: {e}"),
    }
}

/// Precision modes whisper.cpp has weights for, keyed to the ggml file suffix
fn weight_variant(compute_type: &str) -> Result<&'static str, TranscriptionError> {
    match compute_type.to_ascii_lowercase().as_str() {
        "int8" | "int8_float16" | "int8_float32" | "int8_bfloat16" | "q8_0" => Ok("-q8_0"),
        "q5_0" => Ok("-q5_0"),
        "q5_1" => Ok("-q5_1"),
        "default" | "auto" | "float16" | "bfloat16" | "float32" | "int16" => Ok(""),
        _ => Err(TranscriptionError::UnsupportedComputeType(
            compute_type.to_owned(),
        )),
    }
}

/// Maps the device selector to whisper.cpp's GPU flag
fn wants_gpu(device: &str) -> Result<bool, TranscriptionError> {
    match device.to_ascii_lowercase().as_str() {
        "cpu" => Ok(false),
        "cuda" | "gpu" | "metal" | "vulkan" | "auto" => Ok(true),
        _ => Err(TranscriptionError::UnsupportedDevice(device.to_owned())),
    }
}

/// Loads a [`WhisperEngine`] from the configured model cache
pub struct WhisperLoader {
    config: ModelConfig,
    model_dir: PathBuf,
}

impl WhisperLoader {
    /// Creates a loader for `config`, caching weights under `model_dir`
    pub const fn new(config: ModelConfig, model_dir: PathBuf) -> Self {
        Self { config, model_dir }
    }

    /// Resolves the ggml file: an existing path is used as-is, otherwise the cache entry
    ///
    /// # Errors
    /// Returns error if the compute type has no weight variant
    pub fn resolve_model_path(&self) -> Result<PathBuf, TranscriptionError> {
        let direct = Path::new(&self.config.name);
        if direct.is_file() {
            return Ok(direct.to_path_buf());
        }
        let variant = weight_variant(&self.config.compute_type)?;
        Ok(download::cached_model_path(
            &self.model_dir,
            &self.config.name,
            variant,
        ))
    }
}

impl EngineLoader for WhisperLoader {
    fn load(&self) -> Result<Arc<dyn SpeechEngine>, TranscriptionError> {
        let use_gpu = wants_gpu(&self.config.device)?;
        let model_path = self.resolve_model_path()?;

        download::ensure_model_downloaded(&model_path).map_err(|source| {
            TranscriptionError::ModelLoad {
                model: self.config.name.clone(),
                source,
            }
        })?;

        let engine = WhisperEngine::new(
            &model_path,
            use_gpu,
            self.config.threads,
            self.config.beam_size,
            self.config.language.clone(),
        )?;
        Ok(Arc::new(engine))
    }
}
