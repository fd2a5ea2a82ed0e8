use std::sync::Arc;

use anyhow::{Context, Result};
use whisper_server::config::Config;
use whisper_server::server::{self, AppState};
use whisper_server::telemetry;
use whisper_server::transcription::{EngineHandle, WhisperLoader};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    telemetry::init(&config.telemetry)?;
    tracing::info!(
        model = %config.model.name,
        device = %config.model.device,
        compute_type = %config.model.compute_type,
        "whisper-server starting"
    );

    let model_dir = config.ensure_model_dir()?;
    let scratch_dir = config.scratch_dir()?;

    let loader = WhisperLoader::new(config.model.clone(), model_dir);
    let engine = Arc::new(EngineHandle::new(Arc::new(loader)));

    if config.model.preload {
        tracing::info!("preloading model");
        engine.get().await.context("failed to preload model")?;
    } else {
        tracing::info!("deferring model load until first request");
    }

    let state = AppState::new(
        engine,
        &config.model.name,
        scratch_dir,
        config.server.max_upload_bytes,
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    server::serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        tracing::info!("shutdown signal received");
    })
    .await
    .context("server error")?;

    tracing::info!("whisper-server stopped");
    Ok(())
}
