//! Image decoding and PNG encoding
//!
//! Decoding always yields 3-channel RGB: any existing alpha is dropped, since the
//! pipeline replaces it with the computed matte. Encoding writes a lossless PNG
//! with fast compression.

use crate::error::{BgRemovalError, Result};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ImageEncoder, RgbImage, RgbaImage};

/// Decode arbitrary image bytes (PNG, JPEG, WebP) into an RGB buffer
///
/// # Errors
/// Returns `BgRemovalError::Decode` for empty, truncated or unsupported input
pub fn decode(bytes: &[u8]) -> Result<RgbImage> {
    if bytes.is_empty() {
        return Err(BgRemovalError::decode("Image payload is empty"));
    }

    let image = image::load_from_memory(bytes)
        .map_err(|e| BgRemovalError::decode(format!("Failed to decode image from bytes: {}", e)))?;

    if image.width() == 0 || image.height() == 0 {
        return Err(BgRemovalError::decode("Image has zero width or height"));
    }

    log::debug!(
        "Decoded {}x{} image ({:?})",
        image.width(),
        image.height(),
        image.color()
    );

    Ok(image.to_rgb8())
}

/// Encode an RGBA buffer as PNG, keeping the alpha channel
///
/// # Errors
/// Returns `BgRemovalError::Image` if the encoder fails
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let (width, height) = image.dimensions();
    let mut buffer = Vec::with_capacity(image.as_raw().len() / 2);

    PngEncoder::new_with_quality(&mut buffer, CompressionType::Fast, FilterType::Adaptive)
        .write_image(
            image.as_raw(),
            width,
            height,
            image::ExtendedColorType::Rgba8,
        )?;

    Ok(buffer)
}
