//! Configuration types for the background removal server

use crate::error::{BgRemovalError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
        }
    }
}

impl std::str::FromStr for ExecutionProvider {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown execution provider '{}' (expected auto, cpu or cuda)",
                other
            ))),
        }
    }
}

/// Inference backend variant, chosen once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BackendKind {
    /// Full-precision model on ONNX Runtime (accelerator if present)
    #[default]
    FullPrecision,
    /// Pre-quantized model on Tract, CPU only
    Quantized,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FullPrecision => write!(f, "full-precision"),
            Self::Quantized => write!(f, "quantized"),
        }
    }
}

/// Post-scaling applied to the saliency map after it is resized back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MaskPolicy {
    /// Clamp to [0,1] then scale to [0,255]; keeps the model's confidence scale
    #[default]
    Clamp,
    /// Stretch min..max to 0..255; a uniform map yields an all-zero mask
    MinMax,
}

impl std::str::FromStr for MaskPolicy {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "clamp" => Ok(Self::Clamp),
            "minmax" | "min-max" => Ok(Self::MinMax),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown mask policy '{}' (expected clamp or minmax)",
                other
            ))),
        }
    }
}

/// Configuration for the request server and the pipeline it drives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen host
    pub host: String,

    /// Listen port
    pub port: u16,

    /// Set `SO_REUSEADDR` before binding
    pub allow_reuse_address: bool,

    /// Inference backend variant
    pub backend: BackendKind,

    /// Execution provider (full-precision backend only)
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Inverse-transform scaling policy
    pub mask_policy: MaskPolicy,

    /// Directory holding the default page and its assets
    pub static_dir: PathBuf,

    /// Page returned for `/` and any unmatched path
    pub default_page: String,

    /// Maximum number of assets kept in memory
    pub asset_cache_entries: usize,

    /// Maximum total bytes of cached assets
    pub asset_cache_bytes: usize,

    /// Largest accepted request body
    pub max_body_bytes: usize,

    /// Requests handled at once; extra requests get 503 (None = unbounded)
    pub max_concurrent_requests: Option<usize>,

    /// Deadline for a single inference call
    pub inference_timeout: Option<Duration>,

    /// Explicit model file, bypassing the artifact cache
    pub model_path: Option<PathBuf>,

    /// Artifact cache root override
    pub cache_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8001,
            allow_reuse_address: false,
            backend: BackendKind::FullPrecision,
            execution_provider: ExecutionProvider::Auto,
            intra_threads: 0,
            mask_policy: MaskPolicy::Clamp,
            static_dir: PathBuf::from("static"),
            default_page: "index.html".to_string(),
            asset_cache_entries: 32,
            asset_cache_bytes: 8 * 1024 * 1024,
            max_body_bytes: 64 * 1024 * 1024,
            max_concurrent_requests: None,
            inference_timeout: None,
            model_path: None,
            cache_dir: None,
        }
    }
}

impl ServerConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    /// `host:port` string handed to the resolver
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// - Empty host or default page
    /// - Zero body limit or zero connection limit
    /// - Zero inference timeout
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(BgRemovalError::invalid_config("Host cannot be empty"));
        }
        if self.default_page.trim().is_empty() {
            return Err(BgRemovalError::invalid_config(
                "Default page cannot be empty",
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(BgRemovalError::invalid_config(
                "Maximum body size must be greater than zero",
            ));
        }
        if self.max_concurrent_requests == Some(0) {
            return Err(BgRemovalError::invalid_config(
                "Concurrent request limit must be at least 1 (omit it for unbounded)",
            ));
        }
        if self.inference_timeout == Some(Duration::ZERO) {
            return Err(BgRemovalError::invalid_config(
                "Inference timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Builder for `ServerConfig`
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.config.host = host.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    #[must_use]
    pub fn allow_reuse_address(mut self, allow: bool) -> Self {
        self.config.allow_reuse_address = allow;
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.config.backend = backend;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn mask_policy(mut self, policy: MaskPolicy) -> Self {
        self.config.mask_policy = policy;
        self
    }

    #[must_use]
    pub fn static_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.static_dir = dir.into();
        self
    }

    #[must_use]
    pub fn default_page<S: Into<String>>(mut self, page: S) -> Self {
        self.config.default_page = page.into();
        self
    }

    #[must_use]
    pub fn asset_cache(mut self, entries: usize, bytes: usize) -> Self {
        self.config.asset_cache_entries = entries;
        self.config.asset_cache_bytes = bytes;
        self
    }

    #[must_use]
    pub fn max_body_bytes(mut self, bytes: usize) -> Self {
        self.config.max_body_bytes = bytes;
        self
    }

    #[must_use]
    pub fn max_concurrent_requests(mut self, limit: Option<usize>) -> Self {
        self.config.max_concurrent_requests = limit;
        self
    }

    #[must_use]
    pub fn inference_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.inference_timeout = timeout;
        self
    }

    #[must_use]
    pub fn model_path<P: Into<PathBuf>>(mut self, path: Option<P>) -> Self {
        self.config.model_path = path.map(Into::into);
        self
    }

    #[must_use]
    pub fn cache_dir<P: Into<PathBuf>>(mut self, dir: Option<P>) -> Self {
        self.config.cache_dir = dir.map(Into::into);
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// Returns `BgRemovalError::InvalidConfig` when validation fails
    pub fn build(self) -> Result<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
