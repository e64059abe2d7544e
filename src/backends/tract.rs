//! Tract backend running the pre-quantized model on the CPU
//!
//! Pure Rust inference with no native runtime to install, at the cost of some
//! accuracy and speed compared to the full-precision backend.

use crate::error::{BgRemovalError, Result};
use crate::inference::{BackendConfig, InferenceBackend};
use ndarray::Array4;
use std::time::{Duration, Instant};
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Model input resolution (square)
const INPUT_SIZE: usize = 1024;

/// Tract backend for the quantized segmentation model
#[derive(Debug, Default)]
pub struct QuantizedBackend {
    model: Option<TractModel>,
    initialized: bool,
}

impl QuantizedBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn load_model(&mut self, config: &BackendConfig) -> Result<Duration> {
        let model_load_start = Instant::now();

        if config.intra_threads > 0 {
            log::debug!("Tract ignores the intra-op thread setting");
        }

        let model_data = std::fs::read(&config.model_path).map_err(|e| {
            BgRemovalError::model_error_with_context(
                "read",
                &config.model_path,
                &e.to_string(),
                &["check --model-path", "run with --download-only to fetch the model"],
            )
        })?;

        #[allow(clippy::cast_precision_loss)]
        let size_mb = model_data.len() as f64 / (1024.0 * 1024.0);
        log::info!(
            "Initializing Tract backend with {} ({size_mb:.2} MB)",
            config.model_path.display()
        );

        let input_fact = f32::fact([1, 3, INPUT_SIZE, INPUT_SIZE]);
        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .and_then(|model| model.with_input_fact(0, input_fact.into()))
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(|e| {
                BgRemovalError::model_error_with_context(
                    "load",
                    &config.model_path,
                    &e.to_string(),
                    &["delete the cached file so it is downloaded again"],
                )
            })?;

        self.model = Some(model);
        self.initialized = true;

        let model_load_time = model_load_start.elapsed();
        log::info!(
            "Quantized model loaded in {:.0}ms",
            model_load_time.as_secs_f64() * 1000.0
        );

        Ok(model_load_time)
    }
}

impl InferenceBackend for QuantizedBackend {
    fn initialize(&mut self, config: &BackendConfig) -> Result<Option<Duration>> {
        if self.initialized {
            return Ok(None);
        }

        let model_load_time = self.load_model(config)?;
        Ok(Some(model_load_time))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| BgRemovalError::internal("Tract model not initialized"))?;

        log::debug!("Running Tract inference on {:?}", input.shape());
        let inference_start = Instant::now();

        let input_tensor = Tensor::from(input.clone());
        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| BgRemovalError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| BgRemovalError::inference("No output tensor found"))?
            .into_arc_tensor();

        let output_data = output_tensor.to_array_view::<f32>().map_err(|e| {
            BgRemovalError::inference(format!("Failed to convert output tensor: {e}"))
        })?;

        let output_shape = output_data.shape().to_vec();
        let [batch, channels, height, width] = output_shape[..] else {
            return Err(BgRemovalError::inference(format!(
                "Expected 4D output tensor, got {}D",
                output_shape.len()
            )));
        };

        let output_array = Array4::from_shape_vec(
            (batch, channels, height, width),
            output_data.iter().copied().collect(),
        )
        .map_err(|e| BgRemovalError::inference(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "Tract inference completed in {:.2}ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(output_array)
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        (1, 3, INPUT_SIZE, INPUT_SIZE)
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        (1, 1, INPUT_SIZE, INPUT_SIZE)
    }

    fn name(&self) -> &'static str {
        "tract"
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}
