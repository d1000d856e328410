use serde::{Deserialize, Serialize};

use phase_3d::{
    camera::{frustum_bounds, perspective, vertical_fov, Aabb},
    pointcloud::{point_cloud_from_depth, CloudOptions, PointCloud},
    GeometryError,
};
use phase_image::{Image, ImageSize};

use crate::error::StereoError;

/// The renderer boundary receiving display-ready buffers.
///
/// All buffers are in display row order. `update_buffers` is called once per
/// processed depth frame from the host thread and is never re-entered.
pub trait FrameSink {
    /// Prepare the renderer for frames of `size` seen through `horizontal_fov` radians.
    fn init(&mut self, size: ImageSize, horizontal_fov: f32) -> Result<(), StereoError>;

    /// Receive an aligned color frame and depth map in metres.
    fn update_buffers(
        &mut self,
        color: &Image<u8, 4>,
        depth: &Image<f32, 1>,
    ) -> Result<(), StereoError>;

    /// Receive the left and right frames for preview.
    fn update_stereo_images(
        &mut self,
        _left: &Image<u8, 4>,
        _right: &Image<u8, 4>,
    ) -> Result<(), StereoError> {
        Ok(())
    }

    /// Receive the normalized disparity for preview.
    fn update_disparity_image(&mut self, _disparity: &Image<u8, 4>) -> Result<(), StereoError> {
        Ok(())
    }
}

/// Settings of the point cloud renderer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    /// Clipping, scaling and mirroring of the cloud.
    pub cloud: CloudOptions,
    /// Size of a rendered point.
    pub particle_size: f32,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            cloud: CloudOptions::default(),
            particle_size: 0.01,
        }
    }
}

/// The view derived from the camera at init.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderView {
    /// The frame size.
    pub size: ImageSize,
    /// The horizontal field of view in radians.
    pub horizontal_fov: f32,
    /// The vertical field of view in degrees.
    pub vertical_fov_deg: f32,
    /// The row-major perspective projection matrix.
    pub projection: [[f32; 4]; 4],
    /// The box enclosing the frustum between the clip planes.
    pub bounds: Aabb,
}

/// A [`FrameSink`] turning depth frames into colored point clouds.
#[derive(Debug, Default)]
pub struct PointCloudSink {
    settings: RendererSettings,
    view: Option<RenderView>,
    cloud: PointCloud,
    data_ready: bool,
    stereo_preview: Option<(Image<u8, 4>, Image<u8, 4>)>,
    disparity_preview: Option<Image<u8, 4>>,
}

impl PointCloudSink {
    /// Create an uninitialized sink.
    pub fn new(settings: RendererSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    /// The renderer settings.
    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    /// Replace the renderer settings, rebuilding the view if initialized.
    pub fn set_settings(&mut self, settings: RendererSettings) -> Result<(), StereoError> {
        let previous = std::mem::replace(&mut self.settings, settings);
        if let Some(view) = self.view {
            match self.build_view(view.size, view.horizontal_fov) {
                Ok(view) => self.view = Some(view),
                Err(e) => {
                    self.settings = previous;
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Change the field of view, rebuilding the view if initialized.
    pub fn update_hfov(&mut self, horizontal_fov: f32) -> Result<(), StereoError> {
        if let Some(view) = self.view {
            self.view = Some(self.build_view(view.size, horizontal_fov)?);
        }
        Ok(())
    }

    /// The current view, once initialized.
    pub fn view(&self) -> Option<&RenderView> {
        self.view.as_ref()
    }

    /// Whether [`FrameSink::init`] succeeded.
    pub fn is_initialized(&self) -> bool {
        self.view.is_some()
    }

    /// Whether a cloud arrived since the last [`PointCloudSink::take_cloud`].
    pub fn data_ready(&self) -> bool {
        self.data_ready
    }

    /// The last cloud built.
    pub fn cloud(&self) -> &PointCloud {
        &self.cloud
    }

    /// Take the newest cloud if one arrived since the last call.
    pub fn take_cloud(&mut self) -> Option<PointCloud> {
        if !self.data_ready {
            return None;
        }
        self.data_ready = false;
        Some(std::mem::take(&mut self.cloud))
    }

    /// The last left and right preview frames.
    pub fn stereo_preview(&self) -> Option<(&Image<u8, 4>, &Image<u8, 4>)> {
        self.stereo_preview.as_ref().map(|(l, r)| (l, r))
    }

    /// The last disparity preview frame.
    pub fn disparity_preview(&self) -> Option<&Image<u8, 4>> {
        self.disparity_preview.as_ref()
    }

    fn build_view(&self, size: ImageSize, horizontal_fov: f32) -> Result<RenderView, GeometryError> {
        if size.width == 0 || size.height == 0 {
            return Err(GeometryError::EmptyImage(size.width, size.height));
        }
        if !(horizontal_fov > 0.0 && horizontal_fov < std::f32::consts::PI) {
            return Err(GeometryError::InvalidFieldOfView(horizontal_fov));
        }

        let aspect = size.aspect_ratio();
        let vertical_fov_deg = vertical_fov(horizontal_fov, aspect).to_degrees();
        let CloudOptions { z_near, z_far, .. } = self.settings.cloud;

        Ok(RenderView {
            size,
            horizontal_fov,
            vertical_fov_deg,
            projection: perspective(vertical_fov_deg, aspect, z_near, z_far)?,
            bounds: frustum_bounds(vertical_fov_deg, aspect, z_near, z_far)?,
        })
    }
}

impl FrameSink for PointCloudSink {
    fn init(&mut self, size: ImageSize, horizontal_fov: f32) -> Result<(), StereoError> {
        let view = self.build_view(size, horizontal_fov)?;
        log::info!(
            "point cloud renderer initialised for {} with vertical fov {:.1} deg",
            size,
            view.vertical_fov_deg
        );
        self.view = Some(view);
        self.cloud = PointCloud::default();
        self.data_ready = false;
        Ok(())
    }

    fn update_buffers(
        &mut self,
        color: &Image<u8, 4>,
        depth: &Image<f32, 1>,
    ) -> Result<(), StereoError> {
        let view = self.view.ok_or(StereoError::SinkNotInitialized)?;

        if depth.size() != view.size {
            return Err(phase_image::ImageError::InvalidImageSize(
                depth.cols(),
                depth.rows(),
                view.size.width,
                view.size.height,
            )
            .into());
        }

        self.cloud = point_cloud_from_depth(color, depth, view.horizontal_fov, &self.settings.cloud)?;
        self.data_ready = true;
        log::debug!("point cloud updated with {} points", self.cloud.len());
        Ok(())
    }

    fn update_stereo_images(
        &mut self,
        left: &Image<u8, 4>,
        right: &Image<u8, 4>,
    ) -> Result<(), StereoError> {
        self.stereo_preview = Some((left.clone(), right.clone()));
        Ok(())
    }

    fn update_disparity_image(&mut self, disparity: &Image<u8, 4>) -> Result<(), StereoError> {
        self.disparity_preview = Some(disparity.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn size() -> ImageSize {
        ImageSize {
            width: 4,
            height: 2,
        }
    }

    #[test]
    fn update_before_init_fails() -> Result<(), StereoError> {
        let mut sink = PointCloudSink::new(RendererSettings::default());
        let color = Image::<u8, 4>::from_size_val(size(), 0)?;
        let depth = Image::<f32, 1>::from_size_val(size(), 2.0)?;
        assert!(matches!(
            sink.update_buffers(&color, &depth),
            Err(StereoError::SinkNotInitialized)
        ));
        assert!(sink.take_cloud().is_none());
        Ok(())
    }

    #[test]
    fn init_builds_view() -> Result<(), StereoError> {
        let mut sink = PointCloudSink::new(RendererSettings::default());
        sink.init(size(), 1.0)?;

        let view = sink.view().ok_or(StereoError::SinkNotInitialized)?;
        assert_relative_eq!(view.vertical_fov_deg, 0.5f32.to_degrees(), epsilon = 1e-4);
        assert_relative_eq!(view.bounds.center[2], 5.5);
        assert_eq!(view.projection[3][2], -1.0);

        assert!(sink.init(size(), 0.0).is_err());
        assert!(sink.init(ImageSize { width: 0, height: 2 }, 1.0).is_err());
        Ok(())
    }

    #[test]
    fn hfov_change_rebuilds_view() -> Result<(), StereoError> {
        let mut sink = PointCloudSink::new(RendererSettings::default());
        sink.update_hfov(1.2)?;
        assert!(!sink.is_initialized());

        sink.init(size(), 1.0)?;
        let before = *sink.view().ok_or(StereoError::SinkNotInitialized)?;

        sink.update_hfov(1.2)?;
        let after = *sink.view().ok_or(StereoError::SinkNotInitialized)?;
        assert_eq!(after.size, size());
        assert_relative_eq!(after.horizontal_fov, 1.2);
        assert!(after.vertical_fov_deg > before.vertical_fov_deg);

        // a rejected fov keeps the current view
        assert!(sink.update_hfov(4.0).is_err());
        assert_eq!(sink.view().map(|v| v.horizontal_fov), Some(1.2));
        Ok(())
    }

    #[test]
    fn update_builds_cloud_once() -> Result<(), StereoError> {
        let mut sink = PointCloudSink::new(RendererSettings::default());
        sink.init(size(), 1.0)?;

        let color = Image::<u8, 4>::from_size_val(size(), 200)?;
        let mut depth = Image::<f32, 1>::from_size_val(size(), 3.0)?;
        depth.as_slice_mut()[0] = 0.0;

        sink.update_buffers(&color, &depth)?;
        assert!(sink.data_ready());

        let cloud = sink.take_cloud().ok_or(StereoError::SinkNotInitialized)?;
        assert_eq!(cloud.len(), 7);
        assert!(sink.take_cloud().is_none());
        Ok(())
    }

    #[test]
    fn settings_change_rebuilds_view() -> Result<(), StereoError> {
        let mut sink = PointCloudSink::new(RendererSettings::default());
        sink.init(size(), 1.0)?;

        let mut settings = *sink.settings();
        settings.cloud.z_far = 20.0;
        sink.set_settings(settings)?;
        let view = sink.view().ok_or(StereoError::SinkNotInitialized)?;
        assert_relative_eq!(view.bounds.center[2], 10.5);

        settings.cloud.z_near = 30.0;
        assert!(sink.set_settings(settings).is_err());
        Ok(())
    }

    #[test]
    fn size_mismatch_rejected() -> Result<(), StereoError> {
        let mut sink = PointCloudSink::new(RendererSettings::default());
        sink.init(size(), 1.0)?;
        let color = Image::<u8, 4>::from_size_val([2, 2].into(), 0)?;
        let depth = Image::<f32, 1>::from_size_val([2, 2].into(), 2.0)?;
        assert!(matches!(
            sink.update_buffers(&color, &depth),
            Err(StereoError::InvalidInput(_))
        ));
        Ok(())
    }
}
