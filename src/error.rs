//! Error types for background removal and request serving

use thiserror::Error;

/// Result type alias for background removal operations
pub type Result<T> = std::result::Result<T, BgRemovalError>;

/// Error taxonomy shared by the pipeline, the backends and the request server
#[derive(Error, Debug)]
pub enum BgRemovalError {
    /// Input/output errors (file not found, socket closed, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding errors raised by the image crate
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Input bytes are not a decodable image
    #[error("Decode error: {0}")]
    Decode(String),

    /// Missing or invalid JSON, missing `file` key, invalid base64, bad HTTP framing
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Mask and original image disagree on size; always an internal bug
    #[error("Dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    /// Model artifact missing or corrupt, or compute device initialization failed
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Downloading a model artifact failed
    #[error("Network error: {0}")]
    NetworkFetch(String),

    /// Backend inference errors
    #[error("Inference error: {0}")]
    Inference(String),

    /// Inference exceeded the configured deadline
    #[error("Inference timed out after {0}ms")]
    InferenceTimeout(u64),

    /// Request body exceeds the configured limit
    #[error("Payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BgRemovalError {
    /// Create a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new malformed request error
    pub fn malformed_request<S: Into<String>>(msg: S) -> Self {
        Self::MalformedRequest(msg.into())
    }

    /// Create a new backend unavailable error
    pub fn backend_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a dimension mismatch error
    #[must_use]
    pub fn dimension_mismatch(expected: (u32, u32), actual: (u32, u32)) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Create a network error carrying the underlying cause
    pub fn network_error<S: Into<String>, E: std::fmt::Display>(context: S, error: E) -> Self {
        Self::NetworkFetch(format!("{}: {}", context.into(), error))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create model error with troubleshooting context
    pub fn model_error_with_context<P: AsRef<std::path::Path>>(
        operation: &str,
        model_path: P,
        error: &str,
        suggestions: &[&str],
    ) -> Self {
        let path_display = model_path.as_ref().display();
        let suggestion_text = if suggestions.is_empty() {
            String::new()
        } else {
            format!(" Suggestions: {}", suggestions.join(", "))
        };

        Self::BackendUnavailable(format!(
            "Failed to {} model '{}': {}.{}",
            operation, path_display, error, suggestion_text
        ))
    }

    /// HTTP status code used when this error terminates a request
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Decode(_) | Self::MalformedRequest(_) => 400,
            Self::PayloadTooLarge { .. } => 413,
            Self::InferenceTimeout(_) => 504,
            _ => 500,
        }
    }

    /// Whether the failure was caused by the client rather than by the server
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}
