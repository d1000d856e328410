use serde::{Deserialize, Serialize};

use phase_image::Image;

use crate::{depth::INVALID_DEPTH, error::GeometryError};

/// A point cloud with points and per point colors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    // The points in the point cloud.
    points: Vec<[f32; 3]>,
    // The colors of the points.
    colors: Vec<[u8; 4]>,
}

impl PointCloud {
    /// Create a new point cloud from points and colors.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::MismatchedColors`] if the number of points
    /// and colors differ.
    pub fn new(points: Vec<[f32; 3]>, colors: Vec<[u8; 4]>) -> Result<Self, GeometryError> {
        if points.len() != colors.len() {
            return Err(GeometryError::MismatchedColors(points.len(), colors.len()));
        }
        Ok(Self { points, colors })
    }

    /// Get the number of points in the point cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get as reference the points in the point cloud.
    pub fn points(&self) -> &[[f32; 3]] {
        &self.points
    }

    /// Get as reference the RGBA colors of the points in the point cloud.
    pub fn colors(&self) -> &[[u8; 4]] {
        &self.colors
    }
}

/// Options controlling how depth is turned into a cloud.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudOptions {
    /// Points closer than this distance in metres are culled.
    pub z_near: f32,
    /// Points beyond this distance in metres are culled.
    pub z_far: f32,
    /// Uniform scale applied to every point.
    pub scale: f32,
    /// Mirror the cloud along the X axis.
    pub flip_x: bool,
    /// Mirror the cloud along the Y axis.
    pub flip_y: bool,
}

impl Default for CloudOptions {
    fn default() -> Self {
        Self {
            z_near: 1.0,
            z_far: 10.0,
            scale: 1.0,
            flip_x: false,
            flip_y: false,
        }
    }
}

/// Reconstruct a colored point cloud from a depth map.
///
/// A pinhole camera with square pixels is derived from the horizontal field of
/// view. Pixels are taken in display order (row 0 at the top), so Y points up.
///
/// # Arguments
///
/// * `color` - The RGBA image aligned with the depth map.
/// * `depth` - The depth map in metres.
/// * `horizontal_fov` - The horizontal field of view in radians.
/// * `options` - Clipping, scaling and mirroring options.
pub fn point_cloud_from_depth(
    color: &Image<u8, 4>,
    depth: &Image<f32, 1>,
    horizontal_fov: f32,
    options: &CloudOptions,
) -> Result<PointCloud, GeometryError> {
    color.ensure_same_size(depth)?;

    if !(horizontal_fov > 0.0 && horizontal_fov < std::f32::consts::PI) {
        return Err(GeometryError::InvalidFieldOfView(horizontal_fov));
    }

    let (w, h) = (depth.cols() as f32, depth.rows() as f32);
    let focal = (w / 2.0) / (horizontal_fov / 2.0).tan();
    let sx = if options.flip_x { -1.0 } else { 1.0 };
    let sy = if options.flip_y { -1.0 } else { 1.0 };

    let mut points = Vec::new();
    let mut colors = Vec::new();

    for (i, (&z, rgba)) in depth
        .as_slice()
        .iter()
        .zip(color.as_slice().chunks_exact(4))
        .enumerate()
    {
        if z == INVALID_DEPTH || z < options.z_near || z > options.z_far {
            continue;
        }

        let u = (i % depth.cols()) as f32 + 0.5;
        let v = (i / depth.cols()) as f32 + 0.5;

        let x = (u - w / 2.0) * z / focal;
        let y = -(v - h / 2.0) * z / focal;

        points.push([
            sx * x * options.scale,
            sy * y * options.scale,
            z * options.scale,
        ]);
        colors.push([rgba[0], rgba[1], rgba[2], rgba[3]]);
    }

    PointCloud::new(points, colors)
}

#[cfg(test)]
mod tests {
    use super::{point_cloud_from_depth, CloudOptions, PointCloud};
    use crate::error::GeometryError;
    use approx::assert_relative_eq;
    use phase_image::{Image, ImageSize};

    #[test]
    fn cloud_rejects_mismatched_colors() -> Result<(), GeometryError> {
        let cloud = PointCloud::new(vec![[0.0, 0.0, 1.0]], vec![[1, 2, 3, 255]])?;
        assert_eq!(cloud.len(), 1);

        assert_eq!(
            PointCloud::new(vec![[0.0; 3]; 2], vec![[0; 4]]),
            Err(GeometryError::MismatchedColors(2, 1))
        );
        Ok(())
    }

    #[test]
    fn cloud_culls_invalid_and_clipped() -> Result<(), GeometryError> {
        let size = ImageSize {
            width: 2,
            height: 2,
        };
        let color = Image::<u8, 4>::from_size_val(size, 9)?;
        let depth = Image::<f32, 1>::new(size, vec![0.0, 0.5, 2.0, 20.0])?;

        let cloud = point_cloud_from_depth(&color, &depth, 1.0, &CloudOptions::default())?;
        assert_eq!(cloud.len(), 1);
        assert_eq!(cloud.colors()[0], [9, 9, 9, 9]);
        assert_relative_eq!(cloud.points()[0][2], 2.0);
        Ok(())
    }

    #[test]
    fn cloud_centre_pixel_on_axis() -> Result<(), GeometryError> {
        let size = ImageSize {
            width: 3,
            height: 3,
        };
        let color = Image::<u8, 4>::from_size_val(size, 255)?;
        let depth = Image::<f32, 1>::from_size_val(size, 4.0)?;

        let options = CloudOptions {
            scale: 2.0,
            flip_x: true,
            ..Default::default()
        };
        let cloud = point_cloud_from_depth(&color, &depth, 1.2, &options)?;
        assert_eq!(cloud.len(), 9);

        let centre = cloud.points()[4];
        assert_relative_eq!(centre[0], 0.0);
        assert_relative_eq!(centre[1], 0.0);
        assert_relative_eq!(centre[2], 8.0);

        // top left pixel lands left and up, mirrored in x
        let top_left = cloud.points()[0];
        assert!(top_left[0] > 0.0);
        assert!(top_left[1] > 0.0);
        Ok(())
    }

    #[test]
    fn cloud_rejects_mismatched_buffers() -> Result<(), GeometryError> {
        let color = Image::<u8, 4>::from_size_val([4, 2].into(), 0)?;
        let depth = Image::<f32, 1>::from_size_val([2, 2].into(), 1.0)?;
        assert!(point_cloud_from_depth(&color, &depth, 1.0, &CloudOptions::default()).is_err());
        Ok(())
    }
}
