use crate::parallel;
use phase_image::{Image, ImageError};

/// Alpha value written by the conversions into RGBA.
pub const OPAQUE_ALPHA: u8 = 255;

/// Convert a BGR image to an RGBA image.
///
/// The blue and red channels are swapped and the alpha channel is set to
/// [`OPAQUE_ALPHA`].
///
/// # Arguments
///
/// * `src` - The input BGR image.
/// * `dst` - The output RGBA image.
///
/// Precondition: the input and output images must have the same size.
///
/// # Example
///
/// ```
/// use phase_image::{Image, ImageSize};
/// use phase_imgproc::color::rgba_from_bgr;
///
/// let src = Image::<u8, 3>::new(ImageSize { width: 2, height: 1 }, vec![
///     0, 1, 2, // (0, 0)
///     3, 4, 5, // (0, 1)
/// ]).unwrap();
///
/// let mut dst = Image::<u8, 4>::from_size_val(src.size(), 0).unwrap();
///
/// rgba_from_bgr(&src, &mut dst).unwrap();
///
/// assert_eq!(dst.as_slice(), &[2, 1, 0, 255, 5, 4, 3, 255]);
/// ```
pub fn rgba_from_bgr(src: &Image<u8, 3>, dst: &mut Image<u8, 4>) -> Result<(), ImageError> {
    src.ensure_same_size(dst)?;

    parallel::par_iter_rows(src, dst, |src_pixel, dst_pixel| {
        let (b, g, r) = (src_pixel[0], src_pixel[1], src_pixel[2]);
        dst_pixel[0] = r;
        dst_pixel[1] = g;
        dst_pixel[2] = b;
        dst_pixel[3] = OPAQUE_ALPHA;
    });

    Ok(())
}

/// Convert a grayscale image to an RGBA image.
///
/// The gray value is replicated into the three color channels and the alpha
/// channel is set to [`OPAQUE_ALPHA`].
///
/// # Arguments
///
/// * `src` - The input grayscale image.
/// * `dst` - The output RGBA image.
///
/// Precondition: the input and output images must have the same size.
pub fn rgba_from_gray(src: &Image<u8, 1>, dst: &mut Image<u8, 4>) -> Result<(), ImageError> {
    src.ensure_same_size(dst)?;

    parallel::par_iter_rows(src, dst, |src_pixel, dst_pixel| {
        let v = src_pixel[0];
        dst_pixel[..3].fill(v);
        dst_pixel[3] = OPAQUE_ALPHA;
    });

    Ok(())
}

/// Allocate and return the RGBA conversion of a BGR image.
pub fn bgr_to_rgba(src: &Image<u8, 3>) -> Result<Image<u8, 4>, ImageError> {
    let mut dst = Image::from_size_val(src.size(), 0)?;
    rgba_from_bgr(src, &mut dst)?;
    Ok(dst)
}

/// Allocate and return the RGBA conversion of a grayscale image.
pub fn gray_to_rgba(src: &Image<u8, 1>) -> Result<Image<u8, 4>, ImageError> {
    let mut dst = Image::from_size_val(src.size(), 0)?;
    rgba_from_gray(src, &mut dst)?;
    Ok(dst)
}
