//! Request routing: static pages for GET/HEAD, background removal for POST

use super::assets::{route, AssetRoute, StaticAssets};
use super::http::Reply;
use crate::error::{BgRemovalError, Result};
use crate::pipeline::BackgroundRemovalPipeline;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use tiny_http::Method;

/// JSON body of an upload
#[derive(Debug, Deserialize)]
pub struct UploadPayload {
    /// Base64 image bytes, optionally as a `data:` URL
    pub file: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl UploadPayload {
    /// Parse the request body
    ///
    /// # Errors
    /// `BgRemovalError::MalformedRequest` for invalid JSON or a missing `file` key
    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| BgRemovalError::malformed_request(format!("Invalid JSON body: {e}")))
    }

    /// Decode the base64 payload, accepting a `data:<type>;base64,` prefix and line breaks
    ///
    /// # Errors
    /// `BgRemovalError::MalformedRequest` for invalid base64 or an empty payload
    pub fn image_bytes(&self) -> Result<Vec<u8>> {
        let encoded = match self.file.split_once(',') {
            Some((prefix, data)) if prefix.starts_with("data:") && prefix.ends_with(";base64") => {
                data
            },
            _ => self.file.as_str(),
        };
        let cleaned: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        if cleaned.is_empty() {
            return Err(BgRemovalError::malformed_request("Field 'file' is empty"));
        }

        STANDARD
            .decode(cleaned.as_bytes())
            .map_err(|e| BgRemovalError::malformed_request(format!("Invalid base64 in 'file': {e}")))
    }
}

/// Maps requests to replies; shared by all request threads
#[derive(Debug)]
pub struct Router {
    pipeline: BackgroundRemovalPipeline,
    assets: StaticAssets,
}

impl Router {
    #[must_use]
    pub fn new(pipeline: BackgroundRemovalPipeline, assets: StaticAssets) -> Self {
        Self { pipeline, assets }
    }

    #[must_use]
    pub fn assets(&self) -> &StaticAssets {
        &self.assets
    }

    /// Produce the reply for a fully read request
    ///
    /// Never fails: every error becomes an error reply.
    #[must_use]
    pub fn handle(&self, method: &Method, url: &str, body: &[u8]) -> Reply {
        let path = url.split_once('?').map_or(url, |(path, _)| path);
        let result = match method {
            Method::Get | Method::Head => self.serve_static(path),
            Method::Post => self.remove_background(body),
            other => {
                return Reply::text(405, &format!("Method {} not allowed", other.as_str()))
                    .with_header("Allow", "GET, HEAD, POST".to_string());
            },
        };

        result.unwrap_or_else(|error| {
            match &error {
                BgRemovalError::DimensionMismatch { expected, actual } => log::error!(
                    "Mask size {:?} does not match image size {:?} for {}",
                    actual,
                    expected,
                    path
                ),
                e if e.is_client_error() => {
                    log::warn!("Rejected {} {}: {}", method.as_str(), path, e);
                },
                e => log::error!("Failed {} {}: {}", method.as_str(), path, e),
            }
            Reply::from_error(&error)
        })
    }

    fn serve_static(&self, path: &str) -> Result<Reply> {
        let asset = match route(path) {
            AssetRoute::NotFound => return Ok(Reply::text(404, "Not Found")),
            AssetRoute::DefaultPage => self.assets.default_page()?,
            AssetRoute::Asset(name) => match self.assets.load(&name)? {
                Some(asset) => asset,
                None => {
                    log::debug!("Asset {} not found in {}", name, self.assets.root().display());
                    return Ok(Reply::text(404, "Not Found"));
                },
            },
        };
        Ok(Reply::ok(asset.content_type, asset.bytes.to_vec()))
    }

    fn remove_background(&self, body: &[u8]) -> Result<Reply> {
        let payload = UploadPayload::parse(body)?;
        let image_bytes = payload.image_bytes()?;
        log::debug!(
            "Upload {} ({}, {} bytes)",
            payload.filename.as_deref().unwrap_or("<unnamed>"),
            payload.content_type.as_deref().unwrap_or("unknown type"),
            image_bytes.len()
        );

        let output = self.pipeline.process_bytes(&image_bytes)?;
        Ok(Reply::ok("image/png", output.png)
            .with_header("X-Processing-Time-Ms", output.timings.total_ms.to_string())
            .with_header("X-Inference-Time-Ms", output.timings.inference_ms.to_string()))
    }
}
