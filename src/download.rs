//! Model downloading with progress reporting, integrity checks and atomic writes

use crate::cache::{ModelArtifact, ModelCache};
use crate::config::ServerConfig;
use crate::error::{BgRemovalError, Result};
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    pub fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {},
        }
    }

    pub fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {},
        }
    }

    pub fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {},
        }
    }

    pub fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {},
        }
    }

    fn create() -> Self {
        #[cfg(feature = "cli")]
        {
            let pb = ProgressBar::new(0);
            match ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            ) {
                Ok(style) => pb.set_style(style.progress_chars("#>-")),
                Err(e) => log::debug!("Falling back to default progress style: {}", e),
            }
            Self::Indicatif(pb)
        }
        #[cfg(not(feature = "cli"))]
        {
            Self::NoOp
        }
    }
}

/// Fetches model artifacts into the cache
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

impl ModelDownloader {
    /// Create a downloader writing into `cache`
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| BgRemovalError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client, cache })
    }

    /// Return the cached artifact path, downloading it first if missing
    ///
    /// The file is streamed to a temporary sibling and renamed into place only
    /// after the optional digest check passes, so an interrupted download never
    /// leaves a truncated model behind.
    ///
    /// # Errors
    /// - `BgRemovalError::NetworkFetch` for transport or HTTP status failures
    /// - `BgRemovalError::BackendUnavailable` when the digest does not match
    /// - I/O errors while writing the cache
    pub async fn ensure_artifact(
        &self,
        artifact: &ModelArtifact,
        show_progress: bool,
    ) -> Result<PathBuf> {
        let final_path = self.cache.artifact_path(artifact);

        if self.cache.is_artifact_cached(artifact) {
            if verify_file_integrity(&final_path, artifact.sha256.as_deref())? {
                log::debug!("Model already cached: {}", final_path.display());
                return Ok(final_path);
            }
            log::warn!(
                "Cached model {} failed verification, downloading again",
                final_path.display()
            );
        }

        let url = artifact.download_url();
        log::info!("Downloading model from: {}", url);

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BgRemovalError::file_io_error("create directory", parent, &e))?;
        }
        let temp_path = final_path.with_extension(format!("part-{}", std::process::id()));

        let progress = show_progress.then(ProgressIndicator::create);
        if let Some(pb) = &progress {
            pb.set_message(format!("Downloading {}", artifact.file));
        }

        let outcome = match self.download_file(&url, &temp_path, progress.as_ref()).await {
            Ok(()) => Self::commit_download(&temp_path, &final_path, artifact),
            Err(e) => Err(e),
        };

        if outcome.is_err() && temp_path.exists() {
            if let Err(cleanup_err) = fs::remove_file(&temp_path) {
                log::warn!("Failed to clean up partial download: {}", cleanup_err);
            }
        }

        if let Some(pb) = progress {
            let message = if outcome.is_ok() {
                format!("Downloaded {}", artifact.file)
            } else {
                "Download failed".to_string()
            };
            pb.finish_with_message(message);
        }

        outcome.map(|()| {
            log::info!("Model cached at {}", final_path.display());
            final_path
        })
    }

    fn commit_download(temp_path: &Path, final_path: &Path, artifact: &ModelArtifact) -> Result<()> {
        if !verify_file_integrity(temp_path, artifact.sha256.as_deref())? {
            return Err(BgRemovalError::model_error_with_context(
                "verify",
                final_path,
                "SHA-256 digest mismatch",
                &["retry the download", "check the pinned digest"],
            ));
        }

        fs::rename(temp_path, final_path).map_err(|e| {
            BgRemovalError::file_io_error("move downloaded model to cache", final_path, &e)
        })
    }

    async fn download_file(
        &self,
        url: &str,
        local_path: &Path,
        progress: Option<&ProgressIndicator>,
    ) -> Result<()> {
        log::debug!("Downloading: {} -> {}", url, local_path.display());

        let response =
            self.client.get(url).send().await.map_err(|e| {
                BgRemovalError::network_error(format!("Failed to download {}", url), e)
            })?;

        if !response.status().is_success() {
            return Err(BgRemovalError::network_error(
                format!("Failed to download {}", url),
                format!("HTTP status {}", response.status()),
            ));
        }

        let total_size = response.content_length();
        if let (Some(pb), Some(total)) = (progress, total_size) {
            pb.set_length(total);
        }

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| BgRemovalError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0; 64 * 1024];

        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| BgRemovalError::network_error("Failed to read download stream", e))?;

            if bytes_read == 0 {
                break;
            }

            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| BgRemovalError::file_io_error("write to file", local_path, &e))?;

            downloaded += bytes_read as u64;
            if let Some(pb) = progress {
                pb.set_position(downloaded);
            }
        }

        file.flush()
            .await
            .map_err(|e| BgRemovalError::file_io_error("flush file", local_path, &e))?;

        if let Some(total) = total_size {
            if downloaded != total {
                return Err(BgRemovalError::network_error(
                    format!("Failed to download {}", url),
                    format!("received {downloaded} of {total} bytes"),
                ));
            }
        }

        log::debug!("Downloaded {} bytes to {}", downloaded, local_path.display());
        Ok(())
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

/// Check a file against a SHA-256 hex digest; no digest means success
///
/// # Errors
/// - Failed to read the file
pub fn verify_file_integrity(file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
    let Some(expected) = expected_hash else {
        return Ok(true);
    };

    let contents = fs::read(file_path)
        .map_err(|e| BgRemovalError::file_io_error("read file for verification", file_path, &e))?;

    let actual_hash = format!("{:x}", Sha256::digest(&contents));
    if actual_hash.eq_ignore_ascii_case(expected) {
        Ok(true)
    } else {
        log::warn!(
            "File integrity check failed for {}: expected {}, got {}",
            file_path.display(),
            expected,
            actual_hash
        );
        Ok(false)
    }
}

/// Resolve the model file for the configured backend
///
/// An explicit `model_path` is used as is; otherwise the artifact is fetched
/// into the cache when missing.
///
/// # Errors
/// - `BgRemovalError::BackendUnavailable` when an explicit path does not exist
/// - Any error from [`ModelDownloader::ensure_artifact`]
pub async fn resolve_model_path(config: &ServerConfig, show_progress: bool) -> Result<PathBuf> {
    if let Some(path) = &config.model_path {
        if !path.is_file() {
            return Err(BgRemovalError::model_error_with_context(
                "locate",
                path,
                "file not found",
                &["check --model-path", "omit --model-path to use the cache"],
            ));
        }
        return Ok(path.clone());
    }

    let cache = ModelCache::from_override(config.cache_dir.as_deref())?;
    let downloader = ModelDownloader::new(cache)?;
    downloader
        .ensure_artifact(&ModelArtifact::for_backend(config.backend), show_progress)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response per connection
    async fn serve_once(status: &'static str, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request = vec![0u8; 4096];
                let _ = socket.read(&mut request).await;
                let head = format!(
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(body).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}/briaai/RMBG-1.4")
    }

    fn artifact(repo_url: String) -> ModelArtifact {
        ModelArtifact {
            repo_url,
            ..ModelArtifact::for_backend(BackendKind::Quantized)
        }
    }

    #[test]
    fn test_verify_file_integrity() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("model.onnx");
        fs::write(&path, b"hello").unwrap();

        assert!(verify_file_integrity(&path, None).unwrap());
        let digest = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        assert!(verify_file_integrity(&path, Some(digest)).unwrap());
        assert!(verify_file_integrity(&path, Some(&digest.to_uppercase())).unwrap());
        assert!(!verify_file_integrity(&path, Some("00")).unwrap());

        let missing = temp_dir.path().join("missing.onnx");
        assert!(verify_file_integrity(&missing, Some(digest)).is_err());
    }

    #[tokio::test]
    async fn test_cached_artifact_skips_network() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        // Unroutable repo: any network access would fail the test
        let artifact = artifact("http://127.0.0.1:1/none".to_string());
        let path = cache.artifact_path(&artifact);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"weights").unwrap();

        let downloader = ModelDownloader::new(cache).unwrap();
        assert_eq!(downloader.ensure_artifact(&artifact, false).await.unwrap(), path);
    }

    #[tokio::test]
    async fn test_download_into_cache() {
        let repo = serve_once("200 OK", b"fake onnx weights").await;
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        let downloader = ModelDownloader::new(cache).unwrap();

        let path = downloader.ensure_artifact(&artifact(repo), false).await.unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"fake onnx weights");
        assert!(path.ends_with("onnx/model_quantized.onnx"));

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().contains("part-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_http_error_is_network_fetch() {
        let repo = serve_once("404 Not Found", b"missing").await;
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        let downloader = ModelDownloader::new(cache).unwrap();
        let artifact = artifact(repo);

        let err = downloader.ensure_artifact(&artifact, false).await.unwrap_err();
        assert!(matches!(err, BgRemovalError::NetworkFetch(_)));
        assert!(err.to_string().contains("404"));
        assert!(!downloader.cache().is_artifact_cached(&artifact));
    }

    #[tokio::test]
    async fn test_digest_mismatch_discards_download() {
        let repo = serve_once("200 OK", b"tampered").await;
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        let downloader = ModelDownloader::new(cache).unwrap();
        let artifact = artifact(repo).with_sha256("ab".repeat(32));

        let err = downloader.ensure_artifact(&artifact, false).await.unwrap_err();
        assert!(matches!(err, BgRemovalError::BackendUnavailable(_)));
        assert!(!downloader.cache().is_artifact_cached(&artifact));
    }

    #[tokio::test]
    async fn test_resolve_explicit_model_path() {
        let temp_dir = TempDir::new().unwrap();
        let model = temp_dir.path().join("custom.onnx");

        let config = ServerConfig::builder()
            .model_path(Some(&model))
            .build()
            .unwrap();
        let err = resolve_model_path(&config, false).await.unwrap_err();
        assert!(matches!(err, BgRemovalError::BackendUnavailable(_)));

        fs::write(&model, b"weights").unwrap();
        assert_eq!(resolve_model_path(&config, false).await.unwrap(), model);
    }

    #[test]
    fn test_progress_indicator_no_op() {
        let progress = ProgressIndicator::NoOp;
        progress.set_message("test".to_string());
        progress.set_length(100);
        progress.set_position(50);
        progress.finish_with_message("done".to_string());
    }
}
