//! Backend implementations for different inference engines
//!
//! - ONNX Runtime backend for the full-precision model (CPU or CUDA)
//! - Tract backend for the quantized model (pure Rust, CPU only)

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

// Test utilities for backend testing
#[cfg(test)]
pub mod test_utils;

#[cfg(feature = "onnx")]
pub use self::onnx::FullPrecisionBackend;

#[cfg(feature = "tract")]
pub use self::tract::QuantizedBackend;

use crate::{
    config::BackendKind,
    error::{BgRemovalError, Result},
    inference::InferenceBackend,
};

/// Creates backends by kind so callers can inject their own implementations
pub trait BackendFactory {
    /// Create an uninitialized backend of the requested kind
    ///
    /// # Errors
    /// Returns `BgRemovalError::BackendUnavailable` if the kind was not compiled in
    fn create_backend(&self, kind: BackendKind) -> Result<Box<dyn InferenceBackend + Send>>;

    /// Backend kinds this factory can create
    fn available_backends(&self) -> Vec<BackendKind>;
}

/// Factory for the backends enabled by cargo features
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(&self, kind: BackendKind) -> Result<Box<dyn InferenceBackend + Send>> {
        match kind {
            #[cfg(feature = "onnx")]
            BackendKind::FullPrecision => Ok(Box::new(FullPrecisionBackend::new())),
            #[cfg(feature = "tract")]
            BackendKind::Quantized => Ok(Box::new(QuantizedBackend::new())),
            #[allow(unreachable_patterns)]
            other => Err(BgRemovalError::backend_unavailable(format!(
                "The {} backend is not compiled into this build",
                other
            ))),
        }
    }

    fn available_backends(&self) -> Vec<BackendKind> {
        let mut backends = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(BackendKind::FullPrecision);
        #[cfg(feature = "tract")]
        backends.push(BackendKind::Quantized);
        backends
    }
}
