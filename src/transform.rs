//! Tensor transform between pixel buffers and model tensors
//!
//! The forward step stretches the image to the model resolution without preserving
//! aspect ratio; the inverse step stretches the saliency map back to the original
//! size, so no padding offsets need to be tracked between the two.

use crate::{
    config::MaskPolicy,
    error::{BgRemovalError, Result},
    types::{NormalizedTensor, SaliencyMap, SegmentationMask},
};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};

/// Spread below which a saliency map counts as uniform under min-max scaling
const UNIFORM_EPSILON: f32 = 1e-6;

/// Model input geometry and per-channel normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Target input size [width, height]
    pub target_size: [u32; 2],
    /// Normalization mean values [R, G, B]
    pub normalization_mean: [f32; 3],
    /// Normalization standard deviation values [R, G, B]
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            target_size: [1024, 1024],
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
        }
    }
}

impl PreprocessingConfig {
    /// Reject zero sizes and zero standard deviations
    ///
    /// # Errors
    /// Returns `BgRemovalError::InvalidConfig` on invalid values
    pub fn validate(&self) -> Result<()> {
        if self.target_size.contains(&0) {
            return Err(BgRemovalError::invalid_config(
                "Target size must be non-zero",
            ));
        }
        if self.normalization_std.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Err(BgRemovalError::invalid_config(
                "Normalization std must be finite and non-zero",
            ));
        }
        Ok(())
    }
}

/// Forward and inverse transforms around the inference backend
#[derive(Debug, Clone, Default)]
pub struct TensorTransform {
    config: PreprocessingConfig,
    policy: MaskPolicy,
}

impl TensorTransform {
    /// Create a transform for the given geometry and mask policy
    ///
    /// # Errors
    /// Returns `BgRemovalError::InvalidConfig` if the preprocessing config is invalid
    pub fn new(config: PreprocessingConfig, policy: MaskPolicy) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, policy })
    }

    #[must_use]
    pub fn config(&self) -> &PreprocessingConfig {
        &self.config
    }

    #[must_use]
    pub fn policy(&self) -> MaskPolicy {
        self.policy
    }

    /// Resize to the target size and normalize into a `[1, 3, H, W]` tensor
    #[must_use]
    pub fn forward(&self, image: &RgbImage) -> NormalizedTensor {
        let [target_width, target_height] = self.config.target_size;

        let resized = if image.dimensions() == (target_width, target_height) {
            image.clone()
        } else {
            imageops::resize(image, target_width, target_height, FilterType::Triangle)
        };

        self.canvas_to_tensor(&resized)
    }

    fn canvas_to_tensor(&self, canvas: &RgbImage) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mean = self.config.normalization_mean;
        let std = self.config.normalization_std;
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor allocated from the canvas dimensions
        for (y, row) in canvas.rows().enumerate() {
            for (x, pixel) in row.enumerate() {
                for channel in 0..3 {
                    tensor[[0, channel, y, x]] =
                        (f32::from(pixel[channel]) / 255.0 - mean[channel]) / std[channel];
                }
            }
        }

        tensor
    }

    /// Resize a saliency map to `original_size` and scale it to 0..=255
    ///
    /// Saliency is clamped to `[0, 1]` (NaN to 0) before resizing, so both
    /// policies see the same values whether or not a resize happens. Under
    /// [`MaskPolicy::MinMax`] a uniform map (spread below `1e-6`) yields an
    /// all-zero mask.
    ///
    /// # Errors
    /// Returns `BgRemovalError::InvalidConfig` for a zero-sized target
    pub fn inverse(
        &self,
        saliency: &SaliencyMap,
        original_size: (u32, u32),
    ) -> Result<SegmentationMask> {
        let (width, height) = original_size;
        if width == 0 || height == 0 {
            return Err(BgRemovalError::invalid_config(
                "Cannot resize mask to zero width or height",
            ));
        }

        let mut map = saliency.to_image()?;
        for pixel in map.pixels_mut() {
            pixel.0[0] = saturate(pixel.0[0]);
        }
        let resized = if map.dimensions() == original_size {
            map
        } else {
            imageops::resize(&map, width, height, FilterType::Triangle)
        };
        let values = resized.into_raw();

        let data = match self.policy {
            MaskPolicy::Clamp => values.iter().map(|v| clamp_to_byte(*v)).collect(),
            MaskPolicy::MinMax => stretch_to_bytes(&values),
        };

        Ok(SegmentationMask::new(data, original_size))
    }
}

fn saturate(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn clamp_to_byte(value: f32) -> u8 {
    (saturate(value) * 255.0).round() as u8
}

fn stretch_to_bytes(values: &[f32]) -> Vec<u8> {
    let range = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<(f32, f32)>, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        });

    match range {
        Some((lo, hi)) if hi - lo >= UNIFORM_EPSILON => values
            .iter()
            .map(|v| {
                if v.is_finite() {
                    clamp_to_byte((v - lo) / (hi - lo))
                } else {
                    0
                }
            })
            .collect(),
        _ => vec![0; values.len()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn transform(policy: MaskPolicy) -> TensorTransform {
        TensorTransform::new(PreprocessingConfig::default(), policy).unwrap()
    }

    #[test]
    fn test_forward_shape_any_aspect_ratio() {
        let t = transform(MaskPolicy::Clamp);
        for (w, h) in [(100, 50), (1, 1), (3000, 20), (1024, 1024)] {
            let image = RgbImage::from_pixel(w, h, Rgb([10, 20, 30]));
            assert_eq!(t.forward(&image).shape(), &[1, 3, 1024, 1024]);
        }
    }

    #[test]
    fn test_forward_normalization() {
        let t = transform(MaskPolicy::Clamp);
        let image = RgbImage::from_pixel(8, 8, Rgb([255, 0, 51]));
        let tensor = t.forward(&image);

        assert!((tensor[[0, 0, 0, 0]] - 0.5).abs() < 1e-6);
        assert!((tensor[[0, 1, 512, 512]] + 0.5).abs() < 1e-6);
        assert!((tensor[[0, 2, 1023, 1023]] - (0.2 - 0.5)).abs() < 1e-6);
    }

    #[test]
    fn test_custom_geometry() {
        let config = PreprocessingConfig {
            target_size: [16, 8],
            ..PreprocessingConfig::default()
        };
        let t = TensorTransform::new(config, MaskPolicy::Clamp).unwrap();
        let tensor = t.forward(&RgbImage::new(5, 5));
        assert_eq!(tensor.shape(), &[1, 3, 8, 16]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PreprocessingConfig {
            normalization_std: [1.0, 0.0, 1.0],
            ..PreprocessingConfig::default()
        };
        assert!(TensorTransform::new(config, MaskPolicy::Clamp).is_err());

        let config = PreprocessingConfig {
            target_size: [0, 1024],
            ..PreprocessingConfig::default()
        };
        assert!(TensorTransform::new(config, MaskPolicy::Clamp).is_err());
    }

    #[test]
    fn test_inverse_clamp_uniform_maps() {
        let t = transform(MaskPolicy::Clamp);

        let ones = SaliencyMap::uniform((1024, 1024), 1.0);
        let mask = t.inverse(&ones, (100, 50)).unwrap();
        assert_eq!(mask.dimensions, (100, 50));
        assert!(mask.data.iter().all(|&v| v == 255));

        let zeros = SaliencyMap::uniform((1024, 1024), 0.0);
        let mask = t.inverse(&zeros, (100, 50)).unwrap();
        assert!(mask.data.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_inverse_clamp_out_of_range_and_nan() {
        let t = transform(MaskPolicy::Clamp);
        let map = SaliencyMap::new(vec![-0.5, 1.7, f32::NAN, 0.5], (2, 2)).unwrap();
        let mask = t.inverse(&map, (2, 2)).unwrap();
        assert_eq!(mask.data, vec![0, 255, 0, 128]);
    }

    #[test]
    fn test_inverse_minmax_stretches() {
        let t = transform(MaskPolicy::MinMax);
        let map = SaliencyMap::new(vec![0.25, 0.5, 0.75, 0.25], (2, 2)).unwrap();
        let mask = t.inverse(&map, (2, 2)).unwrap();
        assert_eq!(mask.data, vec![0, 128, 255, 0]);
    }

    #[test]
    fn test_inverse_minmax_same_with_and_without_resize() {
        let t = transform(MaskPolicy::MinMax);
        let raw = SaliencyMap::new(vec![-2.0, 0.5, 0.75, 3.0], (2, 2)).unwrap();
        let clamped = SaliencyMap::new(vec![0.0, 0.5, 0.75, 1.0], (2, 2)).unwrap();

        for size in [(2, 2), (6, 5)] {
            assert_eq!(
                t.inverse(&raw, size).unwrap().data,
                t.inverse(&clamped, size).unwrap().data,
                "size {size:?}"
            );
        }
        assert_eq!(t.inverse(&raw, (2, 2)).unwrap().data, vec![0, 128, 191, 255]);
    }

    #[test]
    fn test_inverse_minmax_degenerate_is_all_zero() {
        let t = transform(MaskPolicy::MinMax);
        for value in [0.0, 1.0, 0.37] {
            let map = SaliencyMap::uniform((1024, 1024), value);
            let mask = t.inverse(&map, (64, 48)).unwrap();
            assert_eq!(mask.dimensions, (64, 48));
            assert!(mask.data.iter().all(|&v| v == 0));
        }

        let nan = SaliencyMap::uniform((4, 4), f32::NAN);
        assert!(t.inverse(&nan, (4, 4)).unwrap().data.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_inverse_rejects_zero_size() {
        let t = transform(MaskPolicy::Clamp);
        let map = SaliencyMap::uniform((4, 4), 1.0);
        assert!(t.inverse(&map, (0, 4)).is_err());
    }
}
