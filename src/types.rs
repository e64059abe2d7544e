//! Core data types flowing through the removal pipeline

use crate::error::{BgRemovalError, Result};
use image::{GrayImage, ImageBuffer, Luma};
use ndarray::Array4;
use serde::{Deserialize, Serialize};

/// Normalized NCHW input tensor, shape `[1, 3, H, W]`
pub type NormalizedTensor = Array4<f32>;

/// Single-channel float map produced by a backend, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct SaliencyMap {
    /// Foreground probability per pixel
    pub data: Vec<f32>,
    /// Map dimensions (width, height)
    pub dimensions: (u32, u32),
}

impl SaliencyMap {
    /// Create a saliency map, checking `data.len() == width * height`
    ///
    /// # Errors
    /// Returns `BgRemovalError::Internal` when the length does not match the dimensions
    pub fn new(data: Vec<f32>, dimensions: (u32, u32)) -> Result<Self> {
        let expected = dimensions.0 as usize * dimensions.1 as usize;
        if data.len() != expected {
            return Err(BgRemovalError::internal(format!(
                "Saliency data length {} does not match {}x{}",
                data.len(),
                dimensions.0,
                dimensions.1
            )));
        }
        Ok(Self { data, dimensions })
    }

    /// Map filled with one value
    #[must_use]
    pub fn uniform(dimensions: (u32, u32), value: f32) -> Self {
        Self {
            data: vec![value; dimensions.0 as usize * dimensions.1 as usize],
            dimensions,
        }
    }

    /// Extract the map from a `[1, 1, H, W]` backend output tensor
    ///
    /// # Errors
    /// Returns `BgRemovalError::Inference` for any other shape
    pub fn from_tensor(tensor: &Array4<f32>) -> Result<Self> {
        let (batch, channels, height, width) = tensor.dim();
        if batch != 1 || channels != 1 {
            return Err(BgRemovalError::inference(format!(
                "Expected output tensor [1, 1, H, W], got {:?}",
                tensor.shape()
            )));
        }
        let height_u32 = u32::try_from(height)
            .map_err(|_| BgRemovalError::inference("Output height exceeds u32"))?;
        let width_u32 = u32::try_from(width)
            .map_err(|_| BgRemovalError::inference("Output width exceeds u32"))?;

        let data = tensor.iter().copied().collect();
        Self::new(data, (width_u32, height_u32))
    }

    /// Smallest and largest finite values, `None` when there are none
    #[must_use]
    pub fn min_max(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// View as a float grayscale image for resampling
    ///
    /// # Errors
    /// Returns `BgRemovalError::Internal` if the buffer is inconsistent
    pub fn to_image(&self) -> Result<ImageBuffer<Luma<f32>, Vec<f32>>> {
        let (width, height) = self.dimensions;
        ImageBuffer::from_raw(width, height, self.data.clone())
            .ok_or_else(|| BgRemovalError::internal("Saliency buffer size mismatch"))
    }
}

/// Saliency map resized to the original image and rescaled to 0..=255
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMask {
    /// Mask data as grayscale values (0-255)
    pub data: Vec<u8>,

    /// Mask dimensions (width, height)
    pub dimensions: (u32, u32),
}

impl SegmentationMask {
    /// Create a new segmentation mask
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    /// Create mask from a grayscale image
    #[must_use]
    pub fn from_image(image: &GrayImage) -> Self {
        Self::new(image.as_raw().clone(), image.dimensions())
    }

    /// Convert mask to a grayscale image
    ///
    /// # Errors
    /// Returns `BgRemovalError::Internal` if the data length does not match the dimensions
    pub fn to_image(&self) -> Result<GrayImage> {
        let (width, height) = self.dimensions;
        ImageBuffer::from_raw(width, height, self.data.clone())
            .ok_or_else(|| BgRemovalError::internal("Mask buffer size mismatch"))
    }

    /// Fraction of pixels with a non-zero alpha
    #[must_use]
    pub fn foreground_ratio(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let foreground = self.data.iter().filter(|&&v| v > 0).count();
        foreground as f64 / self.data.len() as f64
    }
}

/// Per-stage timing breakdown of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Image decoding from request bytes
    pub image_decode_ms: u64,

    /// Resize, normalize, tensor conversion
    pub preprocessing_ms: u64,

    /// Backend execution, including time spent waiting for the backend lock
    pub inference_ms: u64,

    /// Inverse transform and compositing
    pub postprocessing_ms: u64,

    /// PNG encoding
    pub image_encode_ms: u64,

    /// Total end-to-end processing time
    pub total_ms: u64,
}

impl ProcessingTimings {
    /// Share of the total spent in inference
    #[must_use]
    pub fn inference_ratio(&self) -> f64 {
        if self.total_ms == 0 {
            0.0
        } else {
            self.inference_ms as f64 / self.total_ms as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saliency_from_tensor() {
        let mut tensor = Array4::<f32>::zeros((1, 1, 2, 3));
        tensor[[0, 0, 1, 2]] = 0.75;
        let map = SaliencyMap::from_tensor(&tensor).unwrap();
        assert_eq!(map.dimensions, (3, 2));
        assert_eq!(map.data.len(), 6);
        assert!((map.data[5] - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn test_saliency_from_tensor_rejects_multichannel() {
        let tensor = Array4::<f32>::zeros((1, 3, 4, 4));
        let err = SaliencyMap::from_tensor(&tensor).unwrap_err();
        assert!(matches!(err, BgRemovalError::Inference(_)));
    }

    #[test]
    fn test_saliency_length_checked() {
        assert!(SaliencyMap::new(vec![0.0; 5], (2, 3)).is_err());
        assert!(SaliencyMap::new(vec![0.0; 6], (2, 3)).is_ok());
    }

    #[test]
    fn test_min_max_skips_nan() {
        let map = SaliencyMap::new(vec![0.2, f32::NAN, 0.9, 0.4], (2, 2)).unwrap();
        assert_eq!(map.min_max(), Some((0.2, 0.9)));

        let all_nan = SaliencyMap::uniform((2, 2), f32::NAN);
        assert_eq!(all_nan.min_max(), None);
    }

    #[test]
    fn test_mask_image_roundtrip_and_ratio() {
        let mask = SegmentationMask::new(vec![0, 255, 128, 0], (2, 2));
        let image = mask.to_image().unwrap();
        assert_eq!(SegmentationMask::from_image(&image), mask);
        assert!((mask.foreground_ratio() - 0.5).abs() < f64::EPSILON);

        let broken = SegmentationMask::new(vec![0; 3], (2, 2));
        assert!(broken.to_image().is_err());
    }

    #[test]
    fn test_inference_ratio() {
        let timings = ProcessingTimings {
            inference_ms: 50,
            total_ms: 200,
            ..ProcessingTimings::default()
        };
        assert!((timings.inference_ratio() - 0.25).abs() < f64::EPSILON);
        assert!(ProcessingTimings::default().inference_ratio().abs() < f64::EPSILON);
    }
}
