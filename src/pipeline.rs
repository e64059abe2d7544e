//! Background removal pipeline
//!
//! Wires the stages together: decode, forward transform, inference, inverse
//! transform, compositing and PNG encoding. The pipeline is cheap to clone and
//! is shared by every request thread; only the inference step is serialized.

use crate::{
    backends::BackendFactory,
    codec, compositor,
    config::{MaskPolicy, ServerConfig},
    error::Result,
    inference::{BackendConfig, SharedBackend},
    transform::{PreprocessingConfig, TensorTransform},
    types::{ProcessingTimings, SegmentationMask},
};
use image::{RgbImage, RgbaImage};
use log::{debug, info};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{instrument, span, Level};

/// Encoded result of one removal
#[derive(Debug, Clone)]
pub struct RemovalOutput {
    /// PNG bytes with the computed alpha channel
    pub png: Vec<u8>,
    /// Width and height, identical to the decoded input
    pub dimensions: (u32, u32),
    /// Stage timings
    pub timings: ProcessingTimings,
}

/// Composite image and the mask that produced it
#[derive(Debug, Clone)]
pub struct Composite {
    pub image: RgbaImage,
    pub mask: SegmentationMask,
}

#[derive(Debug, Clone)]
pub struct BackgroundRemovalPipeline {
    backend: SharedBackend,
    transform: TensorTransform,
}

impl BackgroundRemovalPipeline {
    /// Build a pipeline around an already shared backend
    ///
    /// The transform's target size follows the backend's declared input shape.
    ///
    /// # Errors
    /// Returns `BgRemovalError::InvalidConfig` if the backend reports a zero input size
    pub fn new(backend: SharedBackend, policy: MaskPolicy) -> Result<Self> {
        let (width, height) = backend.input_size();
        let config = PreprocessingConfig {
            target_size: [width, height],
            ..PreprocessingConfig::default()
        };
        let transform = TensorTransform::new(config, policy)?;
        Ok(Self { backend, transform })
    }

    /// Create, load and share the configured backend
    ///
    /// Runs once at startup; the model is never reloaded per request.
    ///
    /// # Errors
    /// - `BgRemovalError::BackendUnavailable` if the backend cannot be created or loaded
    pub fn initialize(
        config: &ServerConfig,
        model_path: PathBuf,
        factory: &dyn BackendFactory,
    ) -> Result<Self> {
        info!(
            "Initializing {} backend from {}",
            config.backend,
            model_path.display()
        );

        let mut backend = factory.create_backend(config.backend)?;
        let backend_config = BackendConfig {
            model_path,
            execution_provider: config.execution_provider,
            intra_threads: config.intra_threads,
        };
        if let Some(load_time) = backend.initialize(&backend_config)? {
            info!("Model ready in {}ms", load_time.as_millis());
        }

        let shared = SharedBackend::new(backend)?.with_timeout(config.inference_timeout);
        Self::new(shared, config.mask_policy)
    }

    #[must_use]
    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    #[must_use]
    pub fn transform(&self) -> &TensorTransform {
        &self.transform
    }

    /// Decode, remove the background and encode as PNG
    ///
    /// # Errors
    /// - `BgRemovalError::Decode` for undecodable input
    /// - Inference errors and timeouts from the backend
    pub fn process_bytes(&self, image_bytes: &[u8]) -> Result<RemovalOutput> {
        let total_start = Instant::now();
        let mut timings = ProcessingTimings::default();

        let decode_start = Instant::now();
        let image = codec::decode(image_bytes)?;
        timings.image_decode_ms = decode_start.elapsed().as_millis() as u64;

        let composite = self.process_image_timed(&image, &mut timings)?;

        let encode_start = Instant::now();
        let png = {
            let _span = span!(Level::DEBUG, "encode").entered();
            codec::encode_png(&composite.image)?
        };
        timings.image_encode_ms = encode_start.elapsed().as_millis() as u64;
        timings.total_ms = total_start.elapsed().as_millis() as u64;

        debug!(
            "Processed {}x{} image in {}ms (inference {}ms, {:.0}% foreground)",
            image.width(),
            image.height(),
            timings.total_ms,
            timings.inference_ms,
            composite.mask.foreground_ratio() * 100.0
        );

        Ok(RemovalOutput {
            png,
            dimensions: image.dimensions(),
            timings,
        })
    }

    /// Remove the background from a decoded image
    ///
    /// # Errors
    /// Inference errors and timeouts from the backend
    pub fn process_image(&self, image: &RgbImage) -> Result<Composite> {
        self.process_image_timed(image, &mut ProcessingTimings::default())
    }

    #[instrument(
        skip(self, image, timings),
        fields(
            backend = %self.backend.name(),
            dimensions = %format!("{}x{}", image.width(), image.height())
        )
    )]
    fn process_image_timed(
        &self,
        image: &RgbImage,
        timings: &mut ProcessingTimings,
    ) -> Result<Composite> {
        let original_dimensions = image.dimensions();

        let input_tensor = {
            let _span = span!(
                Level::DEBUG,
                "preprocessing",
                original_width = %original_dimensions.0,
                original_height = %original_dimensions.1
            )
            .entered();
            let start = Instant::now();
            let tensor = self.transform.forward(image);
            timings.preprocessing_ms = start.elapsed().as_millis() as u64;
            tensor
        };

        let saliency = {
            let _span = span!(Level::INFO, "inference", backend = %self.backend.name()).entered();
            let start = Instant::now();
            let saliency = self.backend.run(input_tensor)?;
            timings.inference_ms = start.elapsed().as_millis() as u64;
            saliency
        };

        let _span = span!(
            Level::DEBUG,
            "background_removal",
            width = %original_dimensions.0,
            height = %original_dimensions.1
        )
        .entered();
        let start = Instant::now();
        let mask = self.transform.inverse(&saliency, original_dimensions)?;
        let composite = compositor::apply(image, &mask)?;
        timings.postprocessing_ms = start.elapsed().as_millis() as u64;

        Ok(Composite {
            image: composite,
            mask,
        })
    }
}
