use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MODEL_BASE_URL: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maps a model name and quantisation suffix to its HuggingFace filename
pub fn model_filename(model_name: &str, variant: &str) -> String {
    format!("ggml-{model_name}{variant}.bin")
}

/// Where the weights for `model_name` live inside the cache directory
pub fn cached_model_path(model_dir: &Path, model_name: &str, variant: &str) -> PathBuf {
    model_dir.join(model_filename(model_name, variant))
}

/// Ensures the model is downloaded, returns true if downloaded, false if already existed
pub fn ensure_model_downloaded(model_path: &Path) -> Result<bool> {
    if model_path.exists() {
        tracing::info!(
            path = %model_path.display(),
            "model already exists, skipping download"
        );
        return Ok(false);
    }

    tracing::info!(
        path = %model_path.display(),
        "model not found, starting download"
    );

    download_model(model_path)?;

    Ok(true)
}

fn download_model(model_path: &Path) -> Result<()> {
    let filename = model_path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("invalid model path {}", model_path.display()))?;
    download_from(&format!("{MODEL_BASE_URL}/{filename}"), model_path)
}

/// Weights run to hundreds of MB, so only the connect phase is bounded
fn download_client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(None)
        .build()
        .context("failed to build download client")
}

fn download_from(url: &str, model_path: &Path) -> Result<()> {
    if let Some(parent) = model_path.parent() {
        fs::create_dir_all(parent).context("failed to create model directory")?;
    }

    tracing::info!(url = %url, "downloading model");

    // Download next to the destination so the rename stays on one filesystem
    let temp_path = model_path.with_extension("tmp");

    let mut response = download_client()?
        .get(url)
        .send()
        .with_context(|| format!("failed to download model from {url}"))?;

    if !response.status().is_success() {
        anyhow::bail!("download failed with status {}: {}", response.status(), url);
    }

    let mut file = fs::File::create(&temp_path)
        .with_context(|| format!("failed to create temp file at {}", temp_path.display()))?;

    let size = match response.copy_to(&mut file) {
        Ok(size) => size,
        Err(e) => {
            drop(file);
            let _ = fs::remove_file(&temp_path);
            return Err(e).context("failed to stream model to temp file");
        }
    };
    file.sync_all().context("failed to flush model file")?;
    drop(file);

    fs::rename(&temp_path, model_path).with_context(|| {
        format!(
            "failed to rename {} to {}",
            temp_path.display(),
            model_path.display()
        )
    })?;

    tracing::info!(
        path = %model_path.display(),
        size,
        "model downloaded successfully"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_filename() {
        assert_eq!(model_filename("small.en", ""), "ggml-small.en.bin");
        assert_eq!(model_filename("small.en", "-q8_0"), "ggml-small.en-q8_0.bin");
        assert_eq!(model_filename("large-v3-turbo", "-q5_0"), "ggml-large-v3-turbo-q5_0.bin");
    }

    #[test]
    fn test_cached_model_path_is_inside_model_dir() {
        let path = cached_model_path(Path::new("/models"), "base", "-q8_0");
        assert_eq!(path, PathBuf::from("/models/ggml-base-q8_0.bin"));
    }

    #[test]
    fn test_ensure_model_downloaded_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("ggml-small.en-q8_0.bin");
        fs::write(&model_path, b"dummy model data").unwrap();

        let downloaded = ensure_model_downloaded(&model_path).unwrap();

        assert!(!downloaded);
    }

    /// Serves one HTTP response on localhost, writing the body in slow chunks
    fn serve_once(status: &'static str, body: Vec<u8>, chunk_delay: Duration) -> String {
        use std::io::{BufRead, BufReader, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 2 {
                line.clear();
            }
            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            )
            .unwrap();
            for chunk in body.chunks(4) {
                std::thread::sleep(chunk_delay);
                if stream.write_all(chunk).is_err() || stream.flush().is_err() {
                    return;
                }
            }
        });
        format!("http://{addr}/ggml-tiny.bin")
    }

    #[test]
    fn test_download_streams_slow_body_to_destination() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("models").join("ggml-tiny.bin");
        let body = b"ggml weights trickling in slowly".to_vec();
        let url = serve_once("200 OK", body.clone(), Duration::from_millis(250));

        download_from(&url, &model_path).unwrap();

        assert_eq!(fs::read(&model_path).unwrap(), body);
        assert!(!model_path.with_extension("tmp").exists());
    }

    #[test]
    fn test_download_error_status_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("ggml-missing.bin");
        let url = serve_once("404 Not Found", b"nope".to_vec(), Duration::ZERO);

        let err = download_from(&url, &model_path).unwrap_err();

        assert!(err.to_string().contains("404"));
        assert!(!model_path.exists());
        assert!(!model_path.with_extension("tmp").exists());
    }

    #[test]
    #[ignore = "requires network access and downloads a 75MB file"]
    fn test_download_model_integration() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = cached_model_path(dir.path(), "tiny", "");

        let downloaded = ensure_model_downloaded(&model_path).unwrap();

        assert!(downloaded);
        assert!(model_path.exists());
        assert!(fs::metadata(&model_path).unwrap().len() > 0);
        assert!(!model_path.with_extension("tmp").exists());
    }

    #[test]
    #[ignore = "requires network access"]
    fn test_download_invalid_model() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = cached_model_path(dir.path(), "nonexistent-model-xyz", "");

        let result = ensure_model_downloaded(&model_path);

        assert!(result.is_err());
        assert!(!model_path.exists());
    }
}
