#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # Background Removal Server
//!
//! An HTTP service that removes the background of uploaded images with a
//! salient-object segmentation model (RMBG-1.4) and returns a PNG whose alpha
//! channel is the predicted foreground mask.
//!
//! ## Features
//!
//! - **Two Backends**: full-precision model on ONNX Runtime (CPU or CUDA) and
//!   pre-quantized model on Tract (pure Rust, CPU only)
//! - **Format Support**: JPEG, PNG and WebP input, PNG output
//! - **Model Management**: automatic download and caching from `HuggingFace`
//! - **Threaded HTTP Server**: `tiny_http` transport, one thread per request,
//!   one model instance shared by all of them, inference serialized
//! - **CLI Integration**: `rmbg-server` binary (enable with `cli` feature)
//!
//! ## Library Usage
//!
//! ```rust,no_run
//! use rmbg_server::{
//!     download::resolve_model_path, BackgroundRemovalPipeline, DefaultBackendFactory,
//!     Server, ServerConfig,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ServerConfig::builder().host("127.0.0.1").port(8001).build()?;
//! let model_path = resolve_model_path(&config, false).await?;
//! let pipeline =
//!     BackgroundRemovalPipeline::initialize(&config, model_path, &DefaultBackendFactory)?;
//!
//! // Decode, segment, composite and encode one image
//! let output = pipeline.process_bytes(&std::fs::read("photo.jpg")?)?;
//! std::fs::write("photo.png", output.png)?;
//!
//! // Or serve it over HTTP
//! Server::bind(&config, pipeline)?.serve()?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): full-precision backend on ONNX Runtime
//! - `tract` (default): quantized backend on Tract
//! - `cli` (default): command-line front-end, progress bars and log output
//! - `tracing-json`: JSON log lines

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod codec;
pub mod compositor;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod pipeline;
pub mod server;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod transform;
pub mod types;

pub use backends::{BackendFactory, DefaultBackendFactory};
#[cfg(feature = "onnx")]
pub use backends::FullPrecisionBackend;
#[cfg(feature = "tract")]
pub use backends::QuantizedBackend;
pub use cache::{format_size, CachedArtifactInfo, ModelArtifact, ModelCache};
pub use config::{BackendKind, ExecutionProvider, MaskPolicy, ServerConfig, ServerConfigBuilder};
pub use download::{resolve_model_path, ModelDownloader};
pub use error::{BgRemovalError, Result};
pub use inference::{BackendConfig, InferenceBackend, SharedBackend};
pub use pipeline::{BackgroundRemovalPipeline, Composite, RemovalOutput};
pub use server::{Server, ServerHandle};
pub use transform::{PreprocessingConfig, TensorTransform};
pub use types::{NormalizedTensor, ProcessingTimings, SaliencyMap, SegmentationMask};

#[cfg(feature = "cli")]
pub use tracing_config::{TracingConfig, TracingFormat};
