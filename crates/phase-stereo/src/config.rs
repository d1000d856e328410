use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use phase_3d::camera::check_downsample_factor;
use phase_imgproc::{flip::FlipAxis, normalize::DisparityRange};

use crate::{
    device::{CameraDeviceType, CameraInterfaceType},
    error::StereoError,
    pipeline::PipelineOptions,
    sink::RendererSettings,
};

/// The slowest accepted camera poll rate.
pub const MIN_READ_RATE_HZ: f32 = 0.01;

/// The fastest accepted camera poll rate.
pub const MAX_READ_RATE_HZ: f32 = 1000.0;

/// The flip applied to turn device order into display order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayFlip {
    /// Mirror left and right.
    Horizontal,
    /// Mirror top and bottom.
    #[default]
    Vertical,
    /// Rotate by 180 degrees.
    Both,
}

impl From<DisplayFlip> for FlipAxis {
    fn from(flip: DisplayFlip) -> Self {
        match flip {
            DisplayFlip::Horizontal => FlipAxis::Horizontal,
            DisplayFlip::Vertical => FlipAxis::Vertical,
            DisplayFlip::Both => FlipAxis::Both,
        }
    }
}

/// Which camera and matcher to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// The camera model.
    pub device_type: CameraDeviceType,
    /// How the camera is attached.
    pub interface: CameraInterfaceType,
    /// Whether a license for the semi-global matcher is available.
    pub license_valid: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_type: CameraDeviceType::StereoTheatreSim,
            interface: CameraInterfaceType::Virtual,
            license_valid: false,
        }
    }
}

/// Configuration of a stereo stream.
///
/// Every field has a default, so a partial JSON document is enough.
///
/// # Example
///
/// ```
/// use phase_stereo::config::StreamConfig;
///
/// let config = StreamConfig::from_json_str(r#"{ "read_rate_hz": 5.0 }"#).unwrap();
/// assert_eq!(config.read_rate_hz, 5.0);
/// assert_eq!(config.exposure, 5000);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// How often the camera is polled, in Hz.
    pub read_rate_hz: f32,
    /// The exposure time in microseconds.
    pub exposure: u32,
    /// The factor frames are downsampled by, in (0, 1].
    pub downsample_factor: f32,
    /// How long a read or match may run before it is abandoned, in ms.
    pub stall_timeout_ms: u64,
    /// How long shutdown waits for workers, in ms.
    pub teardown_timeout_ms: u64,
    /// Invalid results in a row before an error is logged.
    pub max_consecutive_failures: u32,
    /// The flip from device order to display order.
    pub display_flip: DisplayFlip,
    /// A fixed `[min, max]` disparity range for the preview, or min-max per frame.
    pub disparity_range: Option<[f32; 2]>,
    /// The camera and matcher selection.
    pub device: DeviceConfig,
    /// A calibration file to load.
    pub calibration: Option<PathBuf>,
    /// A raw BGR left image served by the virtual camera.
    pub left_image: Option<PathBuf>,
    /// A raw BGR right image served by the virtual camera.
    pub right_image: Option<PathBuf>,
    /// The point cloud renderer settings.
    pub renderer: RendererSettings,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            read_rate_hz: 10.0,
            exposure: 5000,
            downsample_factor: 1.0,
            stall_timeout_ms: 5000,
            teardown_timeout_ms: 2000,
            max_consecutive_failures: 30,
            display_flip: DisplayFlip::default(),
            disparity_range: None,
            device: DeviceConfig::default(),
            calibration: None,
            left_image: None,
            right_image: None,
            renderer: RendererSettings::default(),
        }
    }
}

impl StreamConfig {
    /// Load and validate a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StereoError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StereoError::MissingFile {
                kind: "configuration",
                path: path.to_path_buf(),
            });
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Parse and validate a configuration from a JSON string.
    pub fn from_json_str(contents: &str) -> Result<Self, StereoError> {
        let config: Self = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON.
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<(), StereoError> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Check that all values are in range.
    pub fn validate(&self) -> Result<(), StereoError> {
        if !(MIN_READ_RATE_HZ..=MAX_READ_RATE_HZ).contains(&self.read_rate_hz) {
            return Err(StereoError::InvalidConfig(format!(
                "read_rate_hz must be within [{MIN_READ_RATE_HZ}, {MAX_READ_RATE_HZ}], got {}",
                self.read_rate_hz
            )));
        }
        check_downsample_factor(self.downsample_factor)?;
        if self.stall_timeout_ms == 0 {
            return Err(StereoError::InvalidConfig(
                "stall_timeout_ms must not be zero".to_string(),
            ));
        }
        if let Some([min, max]) = self.disparity_range {
            if !(min.is_finite() && max.is_finite() && min < max) {
                return Err(StereoError::InvalidConfig(format!(
                    "disparity_range must be increasing, got [{min}, {max}]"
                )));
            }
        }
        let cloud = &self.renderer.cloud;
        if !(cloud.z_near > 0.0 && cloud.z_far > cloud.z_near) {
            return Err(StereoError::InvalidConfig(format!(
                "renderer clip planes must satisfy 0 < z_near < z_far, got {} and {}",
                cloud.z_near, cloud.z_far
            )));
        }
        if !(self.renderer.particle_size > 0.0) {
            return Err(StereoError::InvalidConfig(format!(
                "particle_size must be positive, got {}",
                self.renderer.particle_size
            )));
        }
        Ok(())
    }

    /// Check that every configured file exists.
    pub fn check_files(&self) -> Result<(), StereoError> {
        let files = [
            ("calibration", &self.calibration),
            ("left image", &self.left_image),
            ("right image", &self.right_image),
        ];
        for (kind, path) in files {
            if let Some(path) = path {
                if !path.exists() {
                    return Err(StereoError::MissingFile {
                        kind,
                        path: path.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Set the read rate in Hz.
    pub fn with_read_rate(mut self, rate_hz: f32) -> Self {
        self.read_rate_hz = rate_hz;
        self
    }

    /// Set the exposure in microseconds.
    pub fn with_exposure(mut self, exposure: u32) -> Self {
        self.exposure = exposure;
        self
    }

    /// Set the downsample factor.
    pub fn with_downsample_factor(mut self, factor: f32) -> Self {
        self.downsample_factor = factor;
        self
    }

    /// Set the stall timeout.
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the teardown timeout.
    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the display flip.
    pub fn with_display_flip(mut self, flip: DisplayFlip) -> Self {
        self.display_flip = flip;
        self
    }

    /// Use a fixed disparity range for the preview.
    pub fn with_disparity_range(mut self, min: f32, max: f32) -> Self {
        self.disparity_range = Some([min, max]);
        self
    }

    /// Set the calibration file.
    pub fn with_calibration(mut self, path: impl Into<PathBuf>) -> Self {
        self.calibration = Some(path.into());
        self
    }

    /// The time between camera polls.
    pub fn read_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.read_rate_hz as f64)
    }

    /// The stall timeout.
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    /// The teardown timeout.
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    /// The pipeline options derived from this configuration.
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            display_flip: self.display_flip.into(),
            disparity_range: match self.disparity_range {
                Some([min, max]) => DisparityRange::Fixed { min, max },
                None => DisparityRange::MinMax,
            },
        }
    }
}
