//! Mock backends for testing inference without model files
//!
//! The mocks ignore their input and emit a saliency map filled with a fixed
//! value, which makes pipeline output fully predictable.

use crate::{
    error::{BgRemovalError, Result},
    inference::{BackendConfig, InferenceBackend},
};
use ndarray::Array4;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Call counters shared between a mock and the test that owns it
#[derive(Debug, Default)]
pub struct BackendStats {
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

/// Backend returning a constant saliency map of `size x size`
#[derive(Debug, Clone)]
pub struct FixedSaliencyBackend {
    size: usize,
    value: f32,
    delay: Option<Duration>,
    should_fail_init: bool,
    should_fail_inference: bool,
    initialized: bool,
    stats: Arc<BackendStats>,
}

impl FixedSaliencyBackend {
    #[must_use]
    pub fn new(size: usize, value: f32) -> Self {
        Self {
            size,
            value,
            delay: None,
            should_fail_init: false,
            should_fail_inference: false,
            initialized: false,
            stats: Arc::new(BackendStats::default()),
        }
    }

    /// Mark as initialized without going through `initialize`
    #[must_use]
    pub fn initialized(mut self) -> Self {
        self.initialized = true;
        self
    }

    /// Sleep inside `infer` to widen race windows
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn failing(mut self) -> Self {
        self.should_fail_inference = true;
        self
    }

    #[must_use]
    pub fn failing_init(mut self) -> Self {
        self.should_fail_init = true;
        self
    }

    #[must_use]
    pub fn stats(&self) -> Arc<BackendStats> {
        Arc::clone(&self.stats)
    }
}

impl InferenceBackend for FixedSaliencyBackend {
    fn initialize(&mut self, _config: &BackendConfig) -> Result<Option<Duration>> {
        if self.should_fail_init {
            return Err(BgRemovalError::backend_unavailable(
                "Mock initialization failure",
            ));
        }
        if self.initialized {
            return Ok(None);
        }
        self.initialized = true;
        Ok(Some(Duration::from_millis(1)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        if !self.initialized {
            return Err(BgRemovalError::internal("Backend not initialized"));
        }

        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.stats.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let result = if self.should_fail_inference {
            Err(BgRemovalError::inference("Mock inference failure"))
        } else if input.dim() != self.input_shape() {
            Err(BgRemovalError::inference(format!(
                "Unexpected input shape {:?}",
                input.shape()
            )))
        } else {
            Ok(Array4::from_elem((1, 1, self.size, self.size), self.value))
        };

        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        (1, 3, self.size, self.size)
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        (1, 1, self.size, self.size)
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// Backend that panics on its first call and succeeds afterwards
#[derive(Debug)]
pub struct PanickingBackend {
    size: usize,
    panicked: AtomicBool,
}

impl PanickingBackend {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            size,
            panicked: AtomicBool::new(false),
        }
    }
}

impl InferenceBackend for PanickingBackend {
    fn initialize(&mut self, _config: &BackendConfig) -> Result<Option<Duration>> {
        Ok(None)
    }

    fn infer(&mut self, _input: &Array4<f32>) -> Result<Array4<f32>> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("mock backend panic");
        }
        Ok(Array4::zeros((1, 1, self.size, self.size)))
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        (1, 3, self.size, self.size)
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        (1, 1, self.size, self.size)
    }

    fn name(&self) -> &'static str {
        "panicking-mock"
    }

    fn is_initialized(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_lifecycle() {
        let mut backend = FixedSaliencyBackend::new(8, 1.0);
        assert!(!backend.is_initialized());
        assert!(backend.infer(&Array4::zeros((1, 3, 8, 8))).is_err());

        let config = BackendConfig::new("mock.onnx");
        assert!(backend.initialize(&config).unwrap().is_some());
        assert!(backend.initialize(&config).unwrap().is_none());

        let output = backend.infer(&Array4::zeros((1, 3, 8, 8))).unwrap();
        assert_eq!(output.shape(), &[1, 1, 8, 8]);
        assert_eq!(backend.stats().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mock_rejects_wrong_input() {
        let mut backend = FixedSaliencyBackend::new(8, 1.0).initialized();
        assert!(backend.infer(&Array4::zeros((1, 3, 4, 4))).is_err());
    }

    #[test]
    fn test_failing_init() {
        let mut backend = FixedSaliencyBackend::new(8, 1.0).failing_init();
        let err = backend
            .initialize(&BackendConfig::new("mock.onnx"))
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::BackendUnavailable(_)));
    }
}
