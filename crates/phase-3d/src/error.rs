use phase_image::ImageError;

/// An error type for the geometry module.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum GeometryError {
    /// The reprojection matrix was built from a slice of the wrong length.
    #[error("Reprojection matrix needs 16 values, got {0}")]
    InvalidMatrixLength(usize),

    /// The field of view is not inside (0, pi) radians.
    #[error("Invalid field of view: {0} rad")]
    InvalidFieldOfView(f32),

    /// The clip planes do not satisfy 0 < near < far.
    #[error("Invalid clip planes: near {0}, far {1}")]
    InvalidClipPlanes(f32, f32),

    /// The downsample factor is not inside (0, 1].
    #[error("Invalid downsample factor: {0}")]
    InvalidDownsampleFactor(f32),

    /// A cloud was built with a different number of points and colors.
    #[error("Point cloud has {0} points but {1} colors")]
    MismatchedColors(usize, usize),

    /// The image has no pixels.
    #[error("Image size must be non zero, got {0}x{1}")]
    EmptyImage(usize, usize),

    /// An error coming from the image buffers.
    #[error(transparent)]
    Image(#[from] ImageError),
}
