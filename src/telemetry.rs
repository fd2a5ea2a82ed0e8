use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, TelemetryConfig};

const DEFAULT_FILTER: &str = "info,tower_http=debug";

/// Initialize logging: stdout by default, append-only file when `log_path` is set
///
/// `RUST_LOG` overrides the default filter. whisper.cpp's own logging is
/// routed through `tracing` as well.
pub fn init(config: &TelemetryConfig) -> Result<()> {
    let filter = build_filter(std::env::var("RUST_LOG").ok().as_deref());

    match config.log_path.as_deref() {
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
        }
        Some(log_path) => {
            let expanded_path = Config::expand_path(log_path)?;

            if let Some(parent) = expanded_path.parent() {
                fs::create_dir_all(parent).context("failed to create log directory")?;
            }

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&expanded_path)
                .context("failed to open log file")?;

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(file)
                .with_target(false)
                .with_ansi(false)
                .init();

            tracing::info!("logging to {}", expanded_path.display());
        }
    }

    whisper_rs::install_logging_hooks();

    Ok(())
}

fn build_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
