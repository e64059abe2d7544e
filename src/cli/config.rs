//! Conversion of command line arguments into a server configuration

use crate::cli::main_impl::Cli;
use crate::config::{BackendKind, ServerConfig};
use anyhow::{Context, Result};
use std::time::Duration;

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build and validate a `ServerConfig` from CLI arguments
    pub(crate) fn from_cli(cli: &Cli) -> Result<ServerConfig> {
        let backend = if cli.quantized {
            BackendKind::Quantized
        } else {
            BackendKind::FullPrecision
        };
        let provider = cli
            .provider
            .parse()
            .context("Invalid execution provider")?;
        let mask_policy = cli.mask_policy.parse().context("Invalid mask policy")?;

        if cli.quantized && !cli.provider.eq_ignore_ascii_case("auto") {
            log::warn!(
                "--provider {} is ignored by the quantized backend (CPU only)",
                cli.provider
            );
        }

        let config = ServerConfig::builder()
            .host(cli.host.clone())
            .port(cli.port)
            .allow_reuse_address(cli.allow)
            .backend(backend)
            .execution_provider(provider)
            .intra_threads(cli.threads)
            .mask_policy(mask_policy)
            .static_dir(cli.static_dir.clone())
            .max_body_bytes(cli.max_body_mb.saturating_mul(1024 * 1024))
            .max_concurrent_requests(cli.max_concurrent_requests)
            .inference_timeout(cli.inference_timeout_ms.map(Duration::from_millis))
            .model_path(cli.model_path.clone())
            .cache_dir(cli.cache_dir.clone())
            .build()
            .context("Invalid configuration")?;

        Ok(config)
    }
}
