//! Disparity normalization for display.
//!
//! A disparity map holds one float per pixel, in pixels of horizontal shift
//! between the rectified left and right images. Values `<= 0` or non-finite
//! values mark pixels without a stereo match. For display the valid range is
//! mapped onto the 8-bit gray range `[1, 255]` and unmatched pixels are drawn
//! black.
//!
//! # Example
//!
//! ```
//! use phase_image::{Image, ImageSize};
//! use phase_imgproc::normalize::{normalize_disparity, DisparityRange};
//!
//! let disparity = Image::<f32, 1>::new(
//!     ImageSize { width: 3, height: 1 },
//!     vec![-1.0, 10.0, 20.0],
//! ).unwrap();
//!
//! let mut gray = Image::<u8, 1>::from_size_val(disparity.size(), 0).unwrap();
//! normalize_disparity(&disparity, &mut gray, DisparityRange::MinMax).unwrap();
//!
//! assert_eq!(gray.as_slice(), &[0, 1, 255]);
//! ```

use rayon::prelude::*;

use phase_image::{Image, ImageError};

use crate::parallel;

/// How the disparity values are mapped onto the gray range.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum DisparityRange {
    /// Use the minimum and maximum of the valid pixels of each frame.
    #[default]
    MinMax,
    /// Use a fixed range; values outside of it are clamped.
    Fixed {
        /// Disparity drawn as the darkest valid gray.
        min: f32,
        /// Disparity drawn as white.
        max: f32,
    },
}

/// Returns true if the disparity value marks a matched pixel.
#[inline]
pub fn is_valid_disparity(d: f32) -> bool {
    d.is_finite() && d > 0.0
}

/// Compute the minimum and maximum of the valid disparities of an image.
///
/// Returns `None` if the image holds no valid disparity.
pub fn valid_disparity_bounds(src: &Image<f32, 1>) -> Option<(f32, f32)> {
    src.as_slice()
        .par_iter()
        .copied()
        .filter(|&d| is_valid_disparity(d))
        .fold(
            || None,
            |acc: Option<(f32, f32)>, d| match acc {
                Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
                None => Some((d, d)),
            },
        )
        .reduce(
            || None,
            |a, b| match (a, b) {
                (Some((lo_a, hi_a)), Some((lo_b, hi_b))) => Some((lo_a.min(lo_b), hi_a.max(hi_b))),
                (Some(v), None) | (None, Some(v)) => Some(v),
                (None, None) => None,
            },
        )
}

/// Normalize a disparity map into an 8-bit grayscale image.
///
/// Valid disparities are scaled linearly from `[min, max]` onto `[1, 255]`.
/// Invalid disparities are written as `0`. When the range is degenerate every
/// valid pixel is written as `255`.
///
/// # Arguments
///
/// * `src` - The input disparity map.
/// * `dst` - The output grayscale image.
/// * `range` - The disparity range mapped onto the gray range.
///
/// # Errors
///
/// Returns [`ImageError::InvalidImageSize`] if `src` and `dst` have different sizes.
pub fn normalize_disparity(
    src: &Image<f32, 1>,
    dst: &mut Image<u8, 1>,
    range: DisparityRange,
) -> Result<(), ImageError> {
    src.ensure_same_size(dst)?;

    let bounds = match range {
        DisparityRange::MinMax => valid_disparity_bounds(src),
        DisparityRange::Fixed { min, max } => Some((min, max)),
    };

    let Some((min, max)) = bounds else {
        // nothing matched, draw everything black
        dst.as_slice_mut().fill(0);
        return Ok(());
    };

    let span = max - min;

    parallel::par_iter_rows(src, dst, |src_pixel, dst_pixel| {
        let d = src_pixel[0];
        dst_pixel[0] = if !is_valid_disparity(d) {
            0
        } else if span <= f32::EPSILON {
            255
        } else {
            let t = ((d - min) / span).clamp(0.0, 1.0);
            (1.0 + t * 254.0).round() as u8
        };
    });

    Ok(())
}

/// Allocate and return the normalized grayscale image of a disparity map.
pub fn disparity_to_gray(
    src: &Image<f32, 1>,
    range: DisparityRange,
) -> Result<Image<u8, 1>, ImageError> {
    let mut dst = Image::from_size_val(src.size(), 0)?;
    normalize_disparity(src, &mut dst, range)?;
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::DisparityRange;
    use phase_image::{Image, ImageError, ImageSize};

    #[test]
    fn normalize_min_max() -> Result<(), ImageError> {
        let src = Image::<f32, 1>::new(
            ImageSize {
                width: 4,
                height: 1,
            },
            vec![2.0, 4.0, 6.0, 0.0],
        )?;
        let gray = super::disparity_to_gray(&src, DisparityRange::MinMax)?;
        assert_eq!(gray.as_slice(), &[1, 128, 255, 0]);
        Ok(())
    }

    #[test]
    fn normalize_fixed_clamps() -> Result<(), ImageError> {
        let src = Image::<f32, 1>::new([3, 1].into(), vec![1.0, 55.0, 500.0])?;
        let gray =
            super::disparity_to_gray(&src, DisparityRange::Fixed { min: 10.0, max: 100.0 })?;
        assert_eq!(gray.as_slice(), &[1, 128, 255]);
        Ok(())
    }

    #[test]
    fn normalize_all_invalid() -> Result<(), ImageError> {
        let src = Image::<f32, 1>::from_size_val([4, 2].into(), -1.0)?;
        let gray = super::disparity_to_gray(&src, DisparityRange::MinMax)?;
        assert!(gray.as_slice().iter().all(|&v| v == 0));
        Ok(())
    }

    #[test]
    fn normalize_constant_valid() -> Result<(), ImageError> {
        let src = Image::<f32, 1>::new([2, 1].into(), vec![8.0, f32::NAN])?;
        let gray = super::disparity_to_gray(&src, DisparityRange::MinMax)?;
        assert_eq!(gray.as_slice(), &[255, 0]);
        Ok(())
    }

    #[test]
    fn bounds_skip_invalid() -> Result<(), ImageError> {
        let src = Image::<f32, 1>::new([4, 1].into(), vec![-3.0, 5.0, f32::INFINITY, 2.5])?;
        assert_eq!(super::valid_disparity_bounds(&src), Some((2.5, 5.0)));
        Ok(())
    }
}
