use rayon::prelude::*;

use phase_image::{Image, ImageError};

use crate::reprojection::ReprojectionMatrix;

/// Depth written for pixels without a usable stereo match.
pub const INVALID_DEPTH: f32 = 0.0;

/// Counts per metre used when storing depth in 16 bits.
///
/// A full `u16` covers roughly ten metres at a resolution of 0.15 mm.
pub const DEPTH_QUANTIZATION_SCALE: f32 = 6553.5;

/// Compute the metric depth of every pixel of a disparity map.
///
/// Each pixel `(x, y)` with disparity `d` is projected with `Q` and its depth
/// is `Z / W`. Disparities `<= 0` or non-finite, a zero `W` and non-finite or
/// negative results are written as [`INVALID_DEPTH`].
///
/// For a `Q` built by [`ReprojectionMatrix::from_stereo`] the `Z` and `W` rows
/// do not use `x` or `y`, so a map flipped before this call yields the same
/// depth as one flipped after it. A general `Q` does not have this property.
///
/// # Arguments
///
/// * `disparity` - The disparity map in display row order.
/// * `q` - The reprojection matrix of the rectified pair.
/// * `dst` - The output depth map in metres.
///
/// # Errors
///
/// Returns [`ImageError::InvalidImageSize`] if `disparity` and `dst` differ in size.
///
/// # Example
///
/// ```
/// use phase_image::{Image, ImageSize};
/// use phase_3d::{depth::{depth_from_disparity, INVALID_DEPTH}, reprojection::ReprojectionMatrix};
///
/// let q = ReprojectionMatrix::from_stereo(500.0, 1.0, 0.5, 1.0, 0.1);
/// let disparity = Image::<f32, 1>::new(ImageSize { width: 2, height: 1 }, vec![25.0, 0.0]).unwrap();
/// let mut depth = Image::<f32, 1>::from_size_val(disparity.size(), 0.0).unwrap();
///
/// depth_from_disparity(&disparity, &q, &mut depth).unwrap();
///
/// assert!((depth.as_slice()[0] - 2.0).abs() < 1e-5);
/// assert_eq!(depth.as_slice()[1], INVALID_DEPTH);
/// ```
pub fn depth_from_disparity(
    disparity: &Image<f32, 1>,
    q: &ReprojectionMatrix,
    dst: &mut Image<f32, 1>,
) -> Result<(), ImageError> {
    disparity.ensure_same_size(dst)?;

    let cols = disparity.cols();
    if cols == 0 {
        return Ok(());
    }

    dst.as_slice_mut()
        .par_chunks_exact_mut(cols)
        .zip(disparity.as_slice().par_chunks_exact(cols))
        .enumerate()
        .for_each(|(y, (dst_row, src_row))| {
            for (x, (out, &d)) in dst_row.iter_mut().zip(src_row.iter()).enumerate() {
                *out = pixel_depth(q, x as f32, y as f32, d);
            }
        });

    Ok(())
}

/// Allocate and return the depth map of a disparity map.
pub fn disparity_to_depth(
    disparity: &Image<f32, 1>,
    q: &ReprojectionMatrix,
) -> Result<Image<f32, 1>, ImageError> {
    let mut dst = Image::from_size_val(disparity.size(), INVALID_DEPTH)?;
    depth_from_disparity(disparity, q, &mut dst)?;
    Ok(dst)
}

#[inline]
fn pixel_depth(q: &ReprojectionMatrix, x: f32, y: f32, d: f32) -> f32 {
    if !d.is_finite() || d <= 0.0 {
        return INVALID_DEPTH;
    }

    let [_, _, z, w] = q.project(x, y, d);
    if w == 0.0 {
        return INVALID_DEPTH;
    }

    let depth = z / w;
    if !depth.is_finite() || depth < 0.0 {
        return INVALID_DEPTH;
    }
    depth
}

/// Quantize a depth map to 16 bits at [`DEPTH_QUANTIZATION_SCALE`] counts per metre.
///
/// Depths beyond the `u16` range saturate.
pub fn quantize_depth(depth: &Image<f32, 1>) -> Result<Image<u16, 1>, ImageError> {
    let data = depth
        .as_slice()
        .par_iter()
        .map(|&z| (z * DEPTH_QUANTIZATION_SCALE).round().clamp(0.0, u16::MAX as f32) as u16)
        .collect();
    Image::new(depth.size(), data)
}

/// Convert a 16 bit depth map back to metres.
pub fn dequantize_depth(depth: &Image<u16, 1>) -> Result<Image<f32, 1>, ImageError> {
    let data = depth
        .as_slice()
        .par_iter()
        .map(|&v| v as f32 / DEPTH_QUANTIZATION_SCALE)
        .collect();
    Image::new(depth.size(), data)
}

#[cfg(test)]
mod tests {
    use super::INVALID_DEPTH;
    use crate::reprojection::ReprojectionMatrix;
    use approx::assert_relative_eq;
    use phase_image::{Image, ImageError, ImageSize};

    #[test]
    fn zero_disparity_is_invalid_for_any_q() -> Result<(), ImageError> {
        let disparity = Image::<f32, 1>::from_size_val([4, 2].into(), 0.0)?;
        let qs = [
            ReprojectionMatrix::from_stereo(500.0, 2.0, 1.0, 2.0, 0.1),
            ReprojectionMatrix([[1.0; 4]; 4]),
            ReprojectionMatrix([[0.0; 4]; 4]),
        ];
        for q in qs.iter() {
            let depth = super::disparity_to_depth(&disparity, q)?;
            assert!(depth.as_slice().iter().all(|&z| z == INVALID_DEPTH));
        }
        Ok(())
    }

    #[test]
    fn negative_disparity_is_invalid() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 4,
            height: 2,
        };
        let disparity = Image::<f32, 1>::from_size_val(size, -1.0)?;
        let q = ReprojectionMatrix::from_stereo(500.0, 2.0, 1.0, 2.0, 0.1);
        let depth = super::disparity_to_depth(&disparity, &q)?;
        assert_eq!(depth.as_slice().len(), 8);
        assert!(depth.as_slice().iter().all(|&z| z == INVALID_DEPTH));
        Ok(())
    }

    #[test]
    fn depth_inverse_to_disparity() -> Result<(), ImageError> {
        let q = ReprojectionMatrix::from_stereo(400.0, 1.5, 0.5, 1.5, 0.2);
        let disparity = Image::<f32, 1>::new([2, 2].into(), vec![10.0, 20.0, 40.0, f32::NAN])?;
        let depth = super::disparity_to_depth(&disparity, &q)?;
        let z = depth.as_slice();
        assert_relative_eq!(z[0], 8.0, epsilon = 1e-5);
        assert_relative_eq!(z[1], 4.0, epsilon = 1e-5);
        assert_relative_eq!(z[2], 2.0, epsilon = 1e-5);
        assert_eq!(z[3], INVALID_DEPTH);
        Ok(())
    }

    #[test]
    fn degenerate_w_is_invalid() -> Result<(), ImageError> {
        let mut m = [[0.0; 4]; 4];
        m[2][3] = 1.0;
        let q = ReprojectionMatrix(m);
        let disparity = Image::<f32, 1>::from_size_val([2, 1].into(), 5.0)?;
        let depth = super::disparity_to_depth(&disparity, &q)?;
        assert!(depth.as_slice().iter().all(|&z| z == INVALID_DEPTH));
        Ok(())
    }

    #[test]
    fn depth_size_mismatch() -> Result<(), ImageError> {
        let disparity = Image::<f32, 1>::from_size_val([4, 2].into(), 1.0)?;
        let mut depth = Image::<f32, 1>::from_size_val([2, 4].into(), 0.0)?;
        let q = ReprojectionMatrix([[0.0; 4]; 4]);
        assert_eq!(
            super::depth_from_disparity(&disparity, &q, &mut depth),
            Err(ImageError::InvalidImageSize(4, 2, 2, 4))
        );
        Ok(())
    }

    #[test]
    fn quantization_resolution() -> Result<(), ImageError> {
        let depth = Image::<f32, 1>::new([3, 1].into(), vec![0.0, 1.2345, 20.0])?;
        let quantized = super::quantize_depth(&depth)?;
        assert_eq!(quantized.as_slice()[2], u16::MAX);

        let restored = super::dequantize_depth(&quantized)?;
        assert_eq!(restored.as_slice()[0], 0.0);
        assert!((restored.as_slice()[1] - 1.2345).abs() <= 0.5 / super::DEPTH_QUANTIZATION_SCALE);
        Ok(())
    }
}
