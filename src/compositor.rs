//! Combines the original pixels with the computed matte

use crate::{
    error::{BgRemovalError, Result},
    types::SegmentationMask,
};
use image::{Rgba, RgbImage, RgbaImage};

/// Copy RGB from `original` and take alpha from `mask`
///
/// Pixels are never premultiplied: a fully transparent pixel keeps its colour.
///
/// # Errors
/// Returns `BgRemovalError::DimensionMismatch` when the sizes differ, and
/// `BgRemovalError::Internal` when the mask buffer is shorter than its dimensions
pub fn apply(original: &RgbImage, mask: &SegmentationMask) -> Result<RgbaImage> {
    let (width, height) = original.dimensions();
    if mask.dimensions != (width, height) {
        return Err(BgRemovalError::dimension_mismatch(
            (width, height),
            mask.dimensions,
        ));
    }
    if mask.data.len() != width as usize * height as usize {
        return Err(BgRemovalError::internal(format!(
            "Mask holds {} values for a {}x{} image",
            mask.data.len(),
            width,
            height
        )));
    }

    let mut result = RgbaImage::new(width, height);
    for ((source, target), alpha) in original
        .pixels()
        .zip(result.pixels_mut())
        .zip(mask.data.iter())
    {
        *target = Rgba([source[0], source[1], source[2], *alpha]);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_apply_copies_rgb_and_alpha() {
        let mut original = RgbImage::from_pixel(3, 2, Rgb([255, 0, 0]));
        original.put_pixel(1, 1, Rgb([0, 128, 255]));
        let mask = SegmentationMask::new(vec![0, 10, 20, 30, 40, 255], (3, 2));

        let result = apply(&original, &mask).unwrap();
        assert_eq!(result.dimensions(), (3, 2));
        assert_eq!(result.get_pixel(0, 0), &Rgba([255, 0, 0, 0]));
        assert_eq!(result.get_pixel(1, 1), &Rgba([0, 128, 255, 40]));
        assert_eq!(result.get_pixel(2, 1), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_apply_dimension_mismatch() {
        let original = RgbImage::new(100, 50);
        let mask = SegmentationMask::new(vec![0; 5000], (50, 100));

        let err = apply(&original, &mask).unwrap_err();
        assert!(matches!(
            err,
            BgRemovalError::DimensionMismatch {
                expected: (100, 50),
                actual: (50, 100)
            }
        ));
    }

    #[test]
    fn test_apply_short_mask_buffer() {
        let original = RgbImage::new(4, 4);
        let mask = SegmentationMask::new(vec![255; 10], (4, 4));
        assert!(matches!(
            apply(&original, &mask).unwrap_err(),
            BgRemovalError::Internal(_)
        ));
    }
}
