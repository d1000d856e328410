use phase_image::{Image, ImageError};
use rayon::{
    iter::{IndexedParallelIterator, ParallelIterator},
    slice::{ParallelSlice, ParallelSliceMut},
};

/// The axis an image is mirrored along.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FlipAxis {
    /// Reverse the order of the columns (mirror left/right).
    Horizontal,
    /// Reverse the order of the rows (mirror top/bottom).
    #[default]
    Vertical,
    /// Reverse both rows and columns, a rotation by 180 degrees.
    Both,
}

impl FlipAxis {
    /// Map an OpenCV style flip code to an axis.
    ///
    /// `0` flips the rows, a positive code flips the columns and a negative
    /// code flips both.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => FlipAxis::Vertical,
            c if c > 0 => FlipAxis::Horizontal,
            _ => FlipAxis::Both,
        }
    }
}

/// Flip the input image horizontally.
///
/// # Arguments
///
/// * `src` - The input image with shape (H, W, C).
///
/// # Returns
///
/// The flipped image.
///
/// # Example
///
/// ```
/// use phase_image::{Image, ImageSize};
/// use phase_imgproc::flip::horizontal_flip;
///
/// let image = Image::<f32, 3>::new(
///     ImageSize {
///         width: 2,
///         height: 3,
///     },
///     vec![0f32; 2 * 3 * 3],
/// )
/// .unwrap();
///
/// let flipped: Image<f32, 3> = horizontal_flip(&image).unwrap();
///
/// assert_eq!(flipped.size().width, 2);
/// assert_eq!(flipped.size().height, 3);
/// ```
pub fn horizontal_flip<T, const C: usize>(src: &Image<T, C>) -> Result<Image<T, C>, ImageError>
where
    T: Clone + Send + Sync,
{
    let mut dst = src.clone();
    let cols = src.cols();
    if cols == 0 {
        return Ok(dst);
    }

    dst.as_slice_mut()
        .par_chunks_exact_mut(cols * C)
        .for_each(|row| {
            let mut i = 0;
            let mut j = cols - 1;
            while i < j {
                for c in 0..C {
                    row.swap(i * C + c, j * C + c);
                }
                i += 1;
                j -= 1;
            }
        });

    Ok(dst)
}

/// Flip the input image vertically.
///
/// # Arguments
///
/// * `src` - The input image with shape (H, W, C).
///
/// # Returns
///
/// The flipped image.
///
/// # Example
///
/// ```
/// use phase_image::{Image, ImageSize};
/// use phase_imgproc::flip::vertical_flip;
///
/// let image = Image::<u8, 1>::new(
///     ImageSize {
///         width: 2,
///         height: 2,
///     },
///     vec![0, 1, 2, 3],
/// )
/// .unwrap();
///
/// let flipped = vertical_flip(&image).unwrap();
///
/// assert_eq!(flipped.as_slice(), &[2, 3, 0, 1]);
/// ```
pub fn vertical_flip<T, const C: usize>(src: &Image<T, C>) -> Result<Image<T, C>, ImageError>
where
    T: Clone + Send + Sync,
{
    let mut dst = src.clone();
    let stride = src.cols() * C;
    if stride == 0 {
        return Ok(dst);
    }

    dst.as_slice_mut()
        .par_chunks_exact_mut(stride)
        .zip_eq(src.as_slice().par_chunks_exact(stride).rev())
        .for_each(|(dst_row, src_row)| {
            dst_row.clone_from_slice(src_row);
        });

    Ok(dst)
}

/// Flip the input image along the given axis.
///
/// Flipping twice along the same axis returns the original image.
///
/// # Arguments
///
/// * `src` - The input image with shape (H, W, C).
/// * `axis` - The axis to mirror along.
pub fn flip<T, const C: usize>(src: &Image<T, C>, axis: FlipAxis) -> Result<Image<T, C>, ImageError>
where
    T: Clone + Send + Sync,
{
    match axis {
        FlipAxis::Horizontal => horizontal_flip(src),
        FlipAxis::Vertical => vertical_flip(src),
        FlipAxis::Both => horizontal_flip(&vertical_flip(src)?),
    }
}
