//! ONNX Runtime backend running the full-precision model
//!
//! Uses the CUDA execution provider when it is available (or explicitly requested)
//! and the CPU provider otherwise.

use crate::config::ExecutionProvider;
use crate::error::{BgRemovalError, Result};
use crate::inference::{BackendConfig, InferenceBackend};
use ndarray::Array4;
use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider as OrtExecutionProvider};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use ort::value::Value;
use std::time::{Duration, Instant};

/// Model input resolution (square)
const INPUT_SIZE: usize = 1024;

/// ONNX Runtime backend for the full-precision segmentation model
#[derive(Debug, Default)]
pub struct FullPrecisionBackend {
    session: Option<Session>,
    initialized: bool,
}

impl FullPrecisionBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// List execution providers with availability status and descriptions
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available(),
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
        ]
    }

    fn configure_provider(
        builder: SessionBuilder,
        provider: ExecutionProvider,
    ) -> Result<SessionBuilder> {
        let use_cuda = match provider {
            ExecutionProvider::Cpu => {
                log::info!("Using CPU execution provider");
                false
            },
            ExecutionProvider::Auto => {
                let available = cuda_available();
                if available {
                    log::info!("CUDA execution provider is available and will be used");
                } else {
                    log::info!("No hardware acceleration available, using CPU");
                }
                available
            },
            ExecutionProvider::Cuda => {
                if !cuda_available() {
                    return Err(BgRemovalError::backend_unavailable(
                        "CUDA execution provider requested but not available",
                    ));
                }
                log::info!("Using CUDA execution provider");
                true
            },
        };

        if !use_cuda {
            return Ok(builder);
        }

        builder
            .with_execution_providers([CUDAExecutionProvider::default().build()])
            .map_err(|e| {
                BgRemovalError::backend_unavailable(format!(
                    "Failed to set CUDA execution provider: {e}"
                ))
            })
    }

    fn load_model(&mut self, config: &BackendConfig) -> Result<Duration> {
        let model_load_start = Instant::now();

        let model_data = std::fs::read(&config.model_path).map_err(|e| {
            BgRemovalError::model_error_with_context(
                "read",
                &config.model_path,
                &e.to_string(),
                &["check --model-path", "run with --download-only to fetch the model"],
            )
        })?;

        let builder = Session::builder()
            .map_err(|e| {
                BgRemovalError::backend_unavailable(format!(
                    "Failed to create session builder: {e}"
                ))
            })?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                BgRemovalError::backend_unavailable(format!(
                    "Failed to set optimization level: {e}"
                ))
            })?;

        let builder = Self::configure_provider(builder, config.execution_provider)?;
        let intra_threads = config.resolved_intra_threads();

        let session = builder
            .with_intra_threads(intra_threads)
            .map_err(|e| {
                BgRemovalError::backend_unavailable(format!("Failed to set intra threads: {e}"))
            })?
            .commit_from_memory(&model_data)
            .map_err(|e| {
                BgRemovalError::model_error_with_context(
                    "load",
                    &config.model_path,
                    &e.to_string(),
                    &["delete the cached file so it is downloaded again"],
                )
            })?;

        #[allow(clippy::cast_precision_loss)]
        let size_mb = model_data.len() as f64 / (1024.0 * 1024.0);
        log::debug!("ONNX Runtime session created");
        log::debug!("  - Model: {} ({size_mb:.2} MB)", config.model_path.display());
        log::debug!("  - Requested provider: {}", config.execution_provider);
        log::debug!("  - Threading: {intra_threads} intra-op threads");
        log::debug!("  - Optimization level: Level3");

        self.session = Some(session);
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "Full-precision model loaded in {:.0}ms",
            model_load_time.as_secs_f64() * 1000.0
        );

        Ok(model_load_time)
    }
}

fn cuda_available() -> bool {
    OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false)
}

impl InferenceBackend for FullPrecisionBackend {
    fn initialize(&mut self, config: &BackendConfig) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }

        let model_load_time = self.load_model(config)?;
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| BgRemovalError::internal("ONNX session not initialized"))?;

        let inference_start = Instant::now();
        log::debug!("Starting ONNX inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone()).map_err(|e| {
            BgRemovalError::inference(format!("Failed to convert input tensor: {e}"))
        })?;

        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| BgRemovalError::inference(format!("ONNX inference failed: {e}")))?;

        // The first output is the full-resolution matte
        let output_tensor = {
            let keys: Vec<_> = outputs.keys().collect();
            let first_key = keys
                .first()
                .ok_or_else(|| BgRemovalError::inference("No output tensors found"))?;
            outputs
                .get(first_key)
                .ok_or_else(|| BgRemovalError::inference("First output tensor not found"))?
                .try_extract_array::<f32>()
                .map_err(|e| {
                    BgRemovalError::inference(format!("Failed to extract output tensor: {e}"))
                })?
        };

        let output_shape = output_tensor.shape().to_vec();
        let [batch, channels, height, width] = output_shape[..] else {
            return Err(BgRemovalError::inference(format!(
                "Expected 4D output tensor, got {}D",
                output_shape.len()
            )));
        };

        let output_data = output_tensor.iter().copied().collect::<Vec<f32>>();
        let result = Array4::from_shape_vec((batch, channels, height, width), output_data)
            .map_err(|e| {
                BgRemovalError::inference(format!("Failed to reshape output tensor: {e}"))
            })?;

        log::debug!(
            "ONNX inference complete: {:.2}ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(result)
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        (1, 3, INPUT_SIZE, INPUT_SIZE)
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        (1, 1, INPUT_SIZE, INPUT_SIZE)
    }

    fn name(&self) -> &'static str {
        "onnx"
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}
