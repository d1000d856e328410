use phase_image::ImageSize;

use crate::{error::GeometryError, reprojection::ReprojectionMatrix};

/// Derive the vertical field of view from the horizontal one.
///
/// Both angles use the same unit. This is the linear approximation used by the
/// renderer, not the exact `2 * atan(tan(h / 2) / aspect)`.
#[inline]
pub fn vertical_fov(horizontal_fov: f32, aspect_ratio: f32) -> f32 {
    horizontal_fov / aspect_ratio
}

/// Fixed parameters of a connected stereo camera.
///
/// Created when the device connects and rebuilt when the downsample factor or
/// the calibration changes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraParameters {
    /// The image size of the rectified frames.
    pub size: ImageSize,
    /// The horizontal field of view in radians.
    pub horizontal_fov: f32,
    /// The reprojection matrix of the rectified pair.
    pub q: ReprojectionMatrix,
}

impl CameraParameters {
    /// Create a new set of camera parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is empty or the field of view is not in (0, pi).
    pub fn new(
        size: ImageSize,
        horizontal_fov: f32,
        q: ReprojectionMatrix,
    ) -> Result<Self, GeometryError> {
        if size.width == 0 || size.height == 0 {
            return Err(GeometryError::EmptyImage(size.width, size.height));
        }
        if !(horizontal_fov > 0.0 && horizontal_fov < std::f32::consts::PI) {
            return Err(GeometryError::InvalidFieldOfView(horizontal_fov));
        }
        Ok(Self {
            size,
            horizontal_fov,
            q,
        })
    }

    /// Width divided by height.
    #[inline]
    pub fn aspect_ratio(&self) -> f32 {
        self.size.aspect_ratio()
    }

    /// The vertical field of view in radians.
    pub fn vertical_fov(&self) -> f32 {
        vertical_fov(self.horizontal_fov, self.aspect_ratio())
    }

    /// The vertical field of view in degrees, the unit the renderer expects.
    pub fn vertical_fov_degrees(&self) -> f32 {
        self.vertical_fov().to_degrees()
    }
}

/// An axis aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Aabb {
    /// The centre of the box.
    pub center: [f32; 3],
    /// The half size of the box along each axis.
    pub extents: [f32; 3],
}

/// Build an OpenGL style perspective projection matrix, row-major.
///
/// # Arguments
///
/// * `vertical_fov_deg` - The vertical field of view in degrees.
/// * `aspect_ratio` - Width divided by height.
/// * `near` - The near clip plane distance.
/// * `far` - The far clip plane distance.
pub fn perspective(
    vertical_fov_deg: f32,
    aspect_ratio: f32,
    near: f32,
    far: f32,
) -> Result<[[f32; 4]; 4], GeometryError> {
    check_clip_planes(near, far)?;

    let f = 1.0 / (vertical_fov_deg.to_radians() / 2.0).tan();
    let depth = near - far;

    Ok([
        [f / aspect_ratio, 0.0, 0.0, 0.0],
        [0.0, f, 0.0, 0.0],
        [0.0, 0.0, (far + near) / depth, 2.0 * far * near / depth],
        [0.0, 0.0, -1.0, 0.0],
    ])
}

/// Compute a box enclosing the camera frustum between the clip planes.
///
/// The box is centred halfway between the planes on the optical axis and
/// over-estimates the frustum, which is fine for culling the whole cloud.
pub fn frustum_bounds(
    vertical_fov_deg: f32,
    aspect_ratio: f32,
    near: f32,
    far: f32,
) -> Result<Aabb, GeometryError> {
    check_clip_planes(near, far)?;

    let tz = far - near;
    let ty = (vertical_fov_deg.to_radians() / 2.0).tan() * far * 2.0;
    let tx = ty * aspect_ratio;

    Ok(Aabb {
        center: [0.0, 0.0, (far - near) / 2.0 + near],
        extents: [tx, ty, tz],
    })
}

fn check_clip_planes(near: f32, far: f32) -> Result<(), GeometryError> {
    if !(near > 0.0 && far > near) {
        return Err(GeometryError::InvalidClipPlanes(near, far));
    }
    Ok(())
}

/// Keeps the camera parameters in sync with calibration and downsampling.
///
/// The helper is stateless aside from the last aspect ratio it computed, which
/// callers use to detect when the renderer must be re-initialised.
#[derive(Debug, Default)]
pub struct ProjectionHelper {
    parameters: Option<CameraParameters>,
    last_aspect_ratio: Option<f32>,
}

impl ProjectionHelper {
    /// Create a helper with no parameters computed yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the parameters for the current image size and calibration.
    ///
    /// Returns the new parameters and whether the aspect ratio changed since
    /// the last computation.
    pub fn recompute(
        &mut self,
        size: ImageSize,
        horizontal_fov: f32,
        q: ReprojectionMatrix,
    ) -> Result<(CameraParameters, bool), GeometryError> {
        let params = CameraParameters::new(size, horizontal_fov, q)?;
        let aspect = params.aspect_ratio();
        let changed = self.last_aspect_ratio != Some(aspect);

        self.last_aspect_ratio = Some(aspect);
        self.parameters = Some(params);

        Ok((params, changed))
    }

    /// The last computed parameters, if any.
    pub fn parameters(&self) -> Option<&CameraParameters> {
        self.parameters.as_ref()
    }

    /// The last computed aspect ratio, if any.
    pub fn aspect_ratio(&self) -> Option<f32> {
        self.last_aspect_ratio
    }
}

/// Validate a downsample factor, which must lie in (0, 1].
pub fn check_downsample_factor(factor: f32) -> Result<f32, GeometryError> {
    if !(factor > 0.0 && factor <= 1.0) {
        return Err(GeometryError::InvalidDownsampleFactor(factor));
    }
    Ok(factor)
}

/// Scale an image size by a downsample factor, keeping at least one pixel.
pub fn downsampled_size(size: ImageSize, factor: f32) -> ImageSize {
    let scale = |v: usize| ((v as f32 * factor).round() as usize).max(1);
    ImageSize {
        width: scale(size.width),
        height: scale(size.height),
    }
}
