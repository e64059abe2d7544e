//! Model artifact cache
//!
//! Artifacts live in an XDG-compliant directory laid out per repository:
//! `<cache>/models/<owner>--<repo>/<file path inside the repo>`.

use crate::config::BackendKind;
use crate::error::{BgRemovalError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "RMBG_SERVER_CACHE_DIR";

/// Repository hosting both model variants
pub const DEFAULT_MODEL_REPO: &str = "https://huggingface.co/briaai/RMBG-1.4";

/// A single downloadable model file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
    /// Repository URL
    pub repo_url: String,
    /// File path inside the repository
    pub file: String,
    /// Expected SHA-256 hex digest, if pinned
    pub sha256: Option<String>,
}

impl ModelArtifact {
    /// Artifact loaded by the given backend variant
    #[must_use]
    pub fn for_backend(kind: BackendKind) -> Self {
        let file = match kind {
            BackendKind::FullPrecision => "onnx/model.onnx",
            BackendKind::Quantized => "onnx/model_quantized.onnx",
        };
        Self {
            repo_url: DEFAULT_MODEL_REPO.to_string(),
            file: file.to_string(),
            sha256: None,
        }
    }

    /// Pin the expected digest
    #[must_use]
    pub fn with_sha256<S: Into<String>>(mut self, digest: S) -> Self {
        self.sha256 = Some(digest.into().to_ascii_lowercase());
        self
    }

    /// Cache-safe identifier of the owning repository
    #[must_use]
    pub fn model_id(&self) -> String {
        ModelCache::url_to_model_id(&self.repo_url)
    }

    /// Direct download URL for the file
    #[must_use]
    pub fn download_url(&self) -> String {
        format!(
            "{}/resolve/main/{}",
            self.repo_url.trim_end_matches('/'),
            self.file
        )
    }
}

/// Information about a cached artifact
#[derive(Debug, Clone)]
pub struct CachedArtifactInfo {
    /// Repository identifier
    pub model_id: String,
    /// File path relative to the repository directory
    pub file: String,
    /// Size on disk
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Create a cache manager at the default location
    ///
    /// - Linux/macOS: `~/.cache/rmbg-server/models/`
    /// - Windows: `%LOCALAPPDATA%/rmbg-server/models/`
    ///
    /// # Errors
    /// - Failed to determine cache directory
    /// - Failed to create cache directory
    pub fn new() -> Result<Self> {
        let cache_dir = Self::get_cache_dir()?;
        Self::ensure_dir(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    /// Create a cache manager rooted at `cache_dir/models`
    ///
    /// # Errors
    /// - Failed to create cache directory
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        let models_dir = cache_dir.join("models");
        Self::ensure_dir(&models_dir)?;
        Ok(Self {
            cache_dir: models_dir,
        })
    }

    /// Custom root when given, default location otherwise
    ///
    /// # Errors
    /// Same as [`ModelCache::new`] and [`ModelCache::with_custom_cache_dir`]
    pub fn from_override(cache_dir: Option<&Path>) -> Result<Self> {
        match cache_dir {
            Some(dir) => Self::with_custom_cache_dir(dir),
            None => Self::new(),
        }
    }

    fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .map_err(|e| BgRemovalError::file_io_error("create cache directory", dir, &e))?;
        }
        Ok(())
    }

    fn get_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                BgRemovalError::invalid_config(format!(
                    "Failed to determine cache directory. Set {CACHE_DIR_ENV} environment variable."
                ))
            })?
            .join("rmbg-server")
            .join("models"))
    }

    /// Convert a repository URL to a cache-safe identifier
    ///
    /// ```
    /// use rmbg_server::cache::ModelCache;
    ///
    /// let id = ModelCache::url_to_model_id("https://huggingface.co/briaai/RMBG-1.4");
    /// assert_eq!(id, "briaai--RMBG-1.4");
    /// ```
    #[must_use]
    pub fn url_to_model_id(url: &str) -> String {
        let prefix = "https://huggingface.co/";
        if let Some(repo) = url.strip_prefix(prefix) {
            repo.trim_end_matches('/').replace('/', "--")
        } else {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            hasher.update(url.as_bytes());
            let hash_string = format!("url-{:x}", hasher.finalize());
            hash_string.get(..16).unwrap_or(&hash_string).to_string()
        }
    }

    /// Location of an artifact (may not exist)
    #[must_use]
    pub fn artifact_path(&self, artifact: &ModelArtifact) -> PathBuf {
        let mut path = self.cache_dir.join(artifact.model_id());
        for component in artifact.file.split('/').filter(|c| !c.is_empty()) {
            path.push(component);
        }
        path
    }

    /// Whether the artifact exists and is non-empty
    #[must_use]
    pub fn is_artifact_cached(&self, artifact: &ModelArtifact) -> bool {
        fs::metadata(self.artifact_path(artifact))
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false)
    }

    /// List every `.onnx` file under the cache
    ///
    /// # Errors
    /// - Failed to read cache directory
    pub fn scan_cached_artifacts(&self) -> Result<Vec<CachedArtifactInfo>> {
        let mut artifacts = Vec::new();
        if !self.cache_dir.exists() {
            return Ok(artifacts);
        }

        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            BgRemovalError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        for entry in entries.flatten() {
            let repo_dir = entry.path();
            if !repo_dir.is_dir() {
                continue;
            }
            let model_id = entry.file_name().to_string_lossy().into_owned();
            Self::collect_onnx_files(&repo_dir, &repo_dir, &model_id, &mut artifacts)
                .map_err(|e| BgRemovalError::file_io_error("scan model directory", &repo_dir, &e))?;
        }

        artifacts.sort_by(|a, b| (&a.model_id, &a.file).cmp(&(&b.model_id, &b.file)));
        Ok(artifacts)
    }

    fn collect_onnx_files(
        root: &Path,
        dir: &Path,
        model_id: &str,
        out: &mut Vec<CachedArtifactInfo>,
    ) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                Self::collect_onnx_files(root, &path, model_id, out)?;
            } else if path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"))
            {
                let relative = path.strip_prefix(root).unwrap_or(&path);
                out.push(CachedArtifactInfo {
                    model_id: model_id.to_string(),
                    file: relative.to_string_lossy().replace('\\', "/"),
                    size_bytes: entry.metadata()?.len(),
                });
            }
        }
        Ok(())
    }

    /// Remove every cached file of a repository
    ///
    /// Returns `false` if nothing was cached.
    ///
    /// # Errors
    /// - Failed to remove model directory
    pub fn clear_specific_model(&self, model_id: &str) -> Result<bool> {
        let model_path = self.cache_dir.join(model_id);
        if !model_path.exists() {
            return Ok(false);
        }

        log::info!("Removing cached model: {}", model_id);
        fs::remove_dir_all(&model_path).map_err(|e| {
            BgRemovalError::file_io_error("remove cached model", &model_path, &e)
        })?;
        Ok(true)
    }

    #[must_use]
    pub fn get_current_cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// Format file size in human-readable format
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    let unit = UNITS.get(unit_index).unwrap_or(&"B");
    if unit_index == 0 {
        format!("{bytes} {unit}")
    } else {
        format!("{size:.1} {unit}")
    }
}
