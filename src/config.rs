use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable naming an optional TOML config file
pub const CONFIG_FILE_ENV: &str = "WHISPER_SERVER_CONFIG";

/// Complete server configuration
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP listener and upload settings
    pub server: ServerConfig,
    /// Engine settings
    pub model: ModelConfig,
    /// Logging settings
    pub telemetry: TelemetryConfig,
}

/// HTTP listener and upload settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Directory for per-request upload files (`None` = system temp dir)
    pub scratch_dir: Option<String>,
    /// Maximum accepted request body size
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8000,
            scratch_dir: None,
            max_upload_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Engine settings, fixed for the process lifetime
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identifier (`small.en`, `base`, ...) or path to a ggml file
    pub name: String,
    /// Weight cache directory
    pub dir: String,
    /// Compute device selector (`cpu`, `cuda`, `metal`, ...)
    pub device: String,
    /// Numeric precision mode (`int8`, `float16`, ...)
    pub compute_type: String,
    /// Language hint (`None` = auto-detect)
    pub language: Option<String>,
    /// Inference threads
    pub threads: usize,
    /// Beam width (1 = greedy)
    pub beam_size: usize,
    /// Load the engine at startup instead of on first request
    pub preload: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "small.en".to_owned(),
            dir: "/models".to_owned(),
            device: "cpu".to_owned(),
            compute_type: "int8".to_owned(),
            language: None,
            threads: 4,
            beam_size: 5,
            preload: false,
        }
    }
}

/// Logging settings
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Append logs to this file instead of stdout
    pub log_path: Option<String>,
}

impl Config {
    /// Load config from defaults, the optional TOML file and the process environment
    pub fn load() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load config using `lookup` in place of the process environment
    pub fn load_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_FILE_ENV) {
            Some(path) => Self::from_file(&Self::expand_path(&path)?)?,
            None => Self::default(),
        };
        config.apply_env(&lookup)?;
        Ok(config)
    }

    /// Parse a TOML config file; missing sections and keys take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        let config: Self = toml::from_str(&contents).context("failed to parse config TOML")?;

        Ok(config)
    }

    fn apply_env<F>(&mut self, lookup: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("WHISPER_MODEL") {
            self.model.name = v;
        }
        if let Some(v) = lookup("WHISPER_MODEL_DIR") {
            self.model.dir = v;
        }
        if let Some(v) = lookup("WHISPER_DEVICE") {
            self.model.device = v;
        }
        if let Some(v) = lookup("WHISPER_COMPUTE_TYPE") {
            self.model.compute_type = v;
        }
        if let Some(v) = lookup("WHISPER_LANGUAGE") {
            self.model.language = Some(v).filter(|lang| !lang.is_empty());
        }
        if let Some(v) = parse_var(lookup, "WHISPER_THREADS")? {
            self.model.threads = v;
        }
        if let Some(v) = parse_var(lookup, "WHISPER_BEAM_SIZE")? {
            self.model.beam_size = v;
        }
        if let Some(v) = parse_var(lookup, "WHISPER_PRELOAD")? {
            self.model.preload = v;
        }
        if let Some(v) = lookup("WHISPER_HOST") {
            self.server.host = v;
        }
        if let Some(v) = parse_var(lookup, "WHISPER_PORT")? {
            self.server.port = v;
        }
        if let Some(v) = lookup("WHISPER_SCRATCH_DIR") {
            self.server.scratch_dir = Some(v);
        }
        if let Some(v) = parse_var(lookup, "WHISPER_MAX_UPLOAD_BYTES")? {
            self.server.max_upload_bytes = v;
        }
        if let Some(v) = lookup("WHISPER_LOG_PATH") {
            self.telemetry.log_path = Some(v);
        }
        Ok(())
    }

    /// Model cache directory with `~` expanded
    pub fn model_dir(&self) -> Result<PathBuf> {
        Self::expand_path(&self.model.dir)
    }

    /// Scratch directory for uploads with `~` expanded
    pub fn scratch_dir(&self) -> Result<PathBuf> {
        self.server
            .scratch_dir
            .as_deref()
            .map_or_else(|| Ok(std::env::temp_dir()), Self::expand_path)
    }

    /// Create the model cache directory if it doesn't exist yet
    pub fn ensure_model_dir(&self) -> Result<PathBuf> {
        let dir = self.model_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create model directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Expand ~ in paths to home directory
    pub fn expand_path(path: &str) -> Result<PathBuf> {
        if let Some(stripped) = path.strip_prefix("~/") {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            Ok(PathBuf::from(home).join(stripped))
        } else {
            Ok(PathBuf::from(path))
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {key}: {raw:?}"))
        })
        .transpose()
}
