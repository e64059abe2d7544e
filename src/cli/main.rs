//! Background removal server CLI
//!
//! Parses arguments, resolves the model file, loads the backend once and runs
//! the request server until the process is killed.

use super::config::CliConfigBuilder;
use crate::{
    backends::DefaultBackendFactory,
    cache::{format_size, ModelArtifact, ModelCache, CACHE_DIR_ENV},
    config::BackendKind,
    download::resolve_model_path,
    pipeline::BackgroundRemovalPipeline,
    server::Server,
    tracing_config::{TracingConfig, TracingFormat},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;
use std::path::PathBuf;

/// HTTP server that removes image backgrounds
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "rmbg-server")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Host to listen on
    #[arg(short = 'i', long, default_value = "localhost")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8001)]
    pub port: u16,

    /// Allow reusing the address (SO_REUSEADDR)
    #[arg(short, long)]
    pub allow: bool,

    /// Use the quantized model on the pure Rust backend
    #[arg(short, long)]
    pub quantized: bool,

    /// Execution provider for the full-precision backend (auto, cpu, cuda)
    #[arg(long, default_value = "auto")]
    pub provider: String,

    /// Mask scaling policy (clamp, minmax)
    #[arg(long, default_value = "clamp")]
    pub mask_policy: String,

    /// Directory holding index.html and its assets
    #[arg(long, value_name = "DIR", default_value = "static")]
    pub static_dir: PathBuf,

    /// Use this model file instead of the cached download
    #[arg(long, value_name = "PATH")]
    pub model_path: Option<PathBuf>,

    /// Use custom cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Answer 503 once this many requests are in flight
    #[arg(long, value_name = "N")]
    pub max_concurrent_requests: Option<usize>,

    /// Fail a request with 504 when inference takes longer
    #[arg(long, value_name = "MS")]
    pub inference_timeout_ms: Option<u64>,

    /// Largest accepted request body in MiB
    #[arg(long, value_name = "MB", default_value_t = 64)]
    pub max_body_mb: usize,

    /// Number of inference threads (0 = auto-detect)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Filter directives overriding -v (e.g. "rmbg_server=debug,ort=warn")
    #[arg(long, value_name = "FILTER")]
    pub log_filter: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = CliLogFormat::Console)]
    pub log_format: CliLogFormat,

    /// Download the model for the selected backend and exit
    #[arg(long)]
    pub download_only: bool,

    /// List cached models and exit
    #[arg(long)]
    pub list_models: bool,

    /// Remove the cached model repository and exit
    #[arg(long)]
    pub clear_cache: bool,

    /// Show execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliLogFormat {
    Console,
    Compact,
    #[cfg(feature = "tracing-json")]
    Json,
}

impl From<CliLogFormat> for TracingFormat {
    fn from(format: CliLogFormat) -> Self {
        match format {
            CliLogFormat::Console => Self::Console,
            CliLogFormat::Compact => Self::Compact,
            #[cfg(feature = "tracing-json")]
            CliLogFormat::Json => Self::Json,
        }
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut tracing = TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(cli.log_format.into());
    if let Some(filter) = &cli.log_filter {
        tracing = tracing.with_env_filter(filter.clone());
    }
    tracing.init().context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }
    if cli.list_models {
        return list_cached_models(&cli);
    }
    if cli.clear_cache {
        return clear_cache_models(&cli);
    }

    let config = CliConfigBuilder::from_cli(&cli)?;

    let model_path = resolve_model_path(&config, true)
        .await
        .context("Failed to obtain the model")?;
    if cli.download_only {
        println!("Model ready: {}", model_path.display());
        return Ok(());
    }

    info!(
        "Backend: {}, provider: {}, mask policy: {:?}",
        config.backend, config.execution_provider, config.mask_policy
    );
    let pipeline =
        BackgroundRemovalPipeline::initialize(&config, model_path, &DefaultBackendFactory)
            .context("Failed to initialize the inference backend")?;

    let server = Server::bind(&config, pipeline)
        .with_context(|| format!("Failed to listen on {}", config.bind_address()))?;
    info!("Starting server at {} port {}", config.host, config.port);

    tokio::task::spawn_blocking(move || server.serve())
        .await
        .context("Server thread terminated unexpectedly")??;
    Ok(())
}

fn cache_for(cli: &Cli) -> Result<ModelCache> {
    ModelCache::from_override(cli.cache_dir.as_deref()).context("Failed to open model cache")
}

/// List cached models available for serving
fn list_cached_models(cli: &Cli) -> Result<()> {
    let cache = cache_for(cli)?;
    let artifacts = cache
        .scan_cached_artifacts()
        .context("Failed to list cached models")?;

    println!("Cache directory: {}", cache.get_current_cache_dir().display());
    if artifacts.is_empty() {
        println!("No cached models found. Run with --download-only to fetch one.");
        return Ok(());
    }
    for artifact in artifacts {
        println!(
            "  {} / {} ({})",
            artifact.model_id,
            artifact.file,
            format_size(artifact.size_bytes)
        );
    }
    Ok(())
}

/// Remove the cached repository of the default model
fn clear_cache_models(cli: &Cli) -> Result<()> {
    let cache = cache_for(cli)?;
    let model_id = ModelArtifact::for_backend(BackendKind::FullPrecision).model_id();

    if cache.clear_specific_model(&model_id)? {
        println!("Removed {} from {}", model_id, cache.get_current_cache_dir().display());
    } else {
        println!("Model '{}' not found in cache", model_id);
    }
    if std::env::var_os(CACHE_DIR_ENV).is_some() {
        println!("(cache location taken from {CACHE_DIR_ENV})");
    }
    Ok(())
}

/// Display backend and execution provider diagnostics
fn show_provider_diagnostics() {
    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("System: {cpu_count} CPU cores detected");

    println!("\nBackends:");
    #[cfg(feature = "onnx")]
    println!("  full-precision: ONNX Runtime (default)");
    #[cfg(feature = "tract")]
    println!("  quantized: Tract, pure Rust, CPU only (--quantized)");

    #[cfg(feature = "onnx")]
    {
        println!("\nExecution providers:");
        for (name, available, description) in crate::backends::FullPrecisionBackend::list_providers()
        {
            let status = if available { "available" } else { "not available" };
            println!("  {name}: {status} - {description}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "rmbg-server",
            "--host",
            "127.0.0.1",
            "--port",
            "0",
            "--allow",
            "--quantized",
            "-vv",
            "--log-format",
            "compact",
        ])
        .unwrap();

        assert_eq!(cli.host, "127.0.0.1");
        assert_eq!(cli.port, 0);
        assert!(cli.allow);
        assert!(cli.quantized);
        assert_eq!(cli.verbose, 2);
        assert_eq!(TracingFormat::from(cli.log_format), TracingFormat::Compact);
    }

    #[test]
    fn test_cli_struct_defaults() {
        let cli = Cli::try_parse_from(["rmbg-server"]).unwrap();
        assert_eq!(cli.static_dir, PathBuf::from("static"));
        assert_eq!(cli.max_body_mb, 64);
        assert!(!cli.download_only);
        assert!(cli.model_path.is_none());
    }

    #[test]
    fn test_cli_rejects_unknown_log_format() {
        assert!(Cli::try_parse_from(["rmbg-server", "--log-format", "xml"]).is_err());
    }
}
