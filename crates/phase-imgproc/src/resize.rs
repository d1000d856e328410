use rayon::prelude::*;

use phase_image::{Image, ImageError};

/// Resize an image using nearest neighbor sampling.
///
/// Each destination pixel takes the value of the source pixel whose centre is
/// closest to its own centre mapped into the source.
///
/// # Arguments
///
/// * `src` - The input image.
/// * `dst` - The output image, whose size sets the target size.
///
/// # Example
///
/// ```
/// use phase_image::{Image, ImageSize};
/// use phase_imgproc::resize::resize_nearest;
///
/// let src = Image::<u8, 1>::new(ImageSize { width: 4, height: 2 }, vec![
///     0, 1, 2, 3,
///     4, 5, 6, 7,
/// ]).unwrap();
///
/// let mut dst = Image::<u8, 1>::from_size_val(ImageSize { width: 2, height: 1 }, 0).unwrap();
///
/// resize_nearest(&src, &mut dst).unwrap();
///
/// assert_eq!(dst.as_slice(), &[5, 7]);
/// ```
pub fn resize_nearest<T, const C: usize>(
    src: &Image<T, C>,
    dst: &mut Image<T, C>,
) -> Result<(), ImageError>
where
    T: Copy + Send + Sync,
{
    if src.cols() == 0 || src.rows() == 0 {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    let (dst_cols, dst_rows) = (dst.cols(), dst.rows());
    if dst_cols == 0 || dst_rows == 0 {
        return Ok(());
    }

    let (src_cols, src_rows) = (src.cols(), src.rows());
    let scale_x = src_cols as f32 / dst_cols as f32;
    let scale_y = src_rows as f32 / dst_rows as f32;
    let src_data = src.as_slice();

    let nearest = |i: usize, scale: f32, len: usize| {
        (((i as f32 + 0.5) * scale) as usize).min(len - 1)
    };

    dst.as_slice_mut()
        .par_chunks_exact_mut(C * dst_cols)
        .enumerate()
        .for_each(|(y, dst_row)| {
            let sy = nearest(y, scale_y, src_rows);
            let src_row = &src_data[sy * src_cols * C..(sy + 1) * src_cols * C];
            for (x, dst_pixel) in dst_row.chunks_exact_mut(C).enumerate() {
                let sx = nearest(x, scale_x, src_cols);
                dst_pixel.copy_from_slice(&src_row[sx * C..(sx + 1) * C]);
            }
        });

    Ok(())
}
