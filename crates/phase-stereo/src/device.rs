use serde::{Deserialize, Serialize};

use phase_3d::reprojection::ReprojectionMatrix;
use phase_image::{Image, ImageSize};

use crate::error::StereoError;

/// Raw result of one camera read.
///
/// The buffers are BGR, `width * height * 3` bytes, row-major in device order.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct FrameReadResult {
    /// Whether the read produced usable images.
    pub valid: bool,
    /// The left image.
    pub left: Vec<u8>,
    /// The right image.
    pub right: Vec<u8>,
}

impl FrameReadResult {
    /// A successful read.
    pub fn new(left: Vec<u8>, right: Vec<u8>) -> Self {
        Self {
            valid: true,
            left,
            right,
        }
    }

    /// A failed read.
    pub fn invalid() -> Self {
        Self::default()
    }
}

/// Raw result of one stereo match.
///
/// One disparity per pixel, `width * height` values in device order.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct MatchComputeResult {
    /// Whether the match produced a usable disparity map.
    pub valid: bool,
    /// The disparity map.
    pub disparity: Vec<f32>,
}

impl MatchComputeResult {
    /// A successful match.
    pub fn new(disparity: Vec<f32>) -> Self {
        Self {
            valid: true,
            disparity,
        }
    }

    /// A failed match.
    pub fn invalid() -> Self {
        Self::default()
    }
}

/// A left and right BGR image of the same size.
#[derive(Clone, Debug, PartialEq)]
pub struct StereoImagePair {
    /// The left image.
    pub left: Image<u8, 3>,
    /// The right image.
    pub right: Image<u8, 3>,
}

impl StereoImagePair {
    /// Create a pair, checking that both images share a size.
    pub fn new(left: Image<u8, 3>, right: Image<u8, 3>) -> Result<Self, StereoError> {
        left.ensure_same_size(&right)?;
        Ok(Self { left, right })
    }

    /// The size of both images.
    pub fn size(&self) -> ImageSize {
        self.left.size()
    }
}

/// A stereo camera exposing a threaded read.
///
/// Reads run on a worker owned by the implementation. The host starts a read,
/// polls [`StereoCamera::is_read_thread_running`] and fetches the result only
/// once the worker is done, so it never blocks.
pub trait StereoCamera {
    /// Open the device.
    fn connect(&mut self) -> Result<(), StereoError>;

    /// Close the device.
    fn disconnect(&mut self);

    /// Whether the device is open.
    fn is_connected(&self) -> bool;

    /// The width of the images the device currently produces.
    fn width(&self) -> usize;

    /// The height of the images the device currently produces.
    fn height(&self) -> usize;

    /// The size of the images the device currently produces.
    fn size(&self) -> ImageSize {
        ImageSize {
            width: self.width(),
            height: self.height(),
        }
    }

    /// Set the exposure time in microseconds.
    fn set_exposure(&mut self, exposure: u32);

    /// Set the factor the images are downsampled by, in (0, 1].
    fn set_downsample_factor(&mut self, factor: f32);

    /// Begin streaming after connecting.
    fn start_capture(&mut self) -> Result<(), StereoError> {
        Ok(())
    }

    /// Start reading a frame pair on the worker.
    fn start_read_thread(&mut self);

    /// Whether the worker is still reading.
    fn is_read_thread_running(&self) -> bool;

    /// Take the result of the last finished read.
    fn read_thread_result(&mut self) -> FrameReadResult;
}

/// A stereo matcher exposing a threaded disparity computation.
pub trait StereoMatcher {
    /// Start matching a rectified pair on the worker.
    fn start_compute_thread(&mut self, pair: StereoImagePair);

    /// Whether the worker is still matching.
    fn is_compute_thread_running(&self) -> bool;

    /// Take the result of the last finished match for images of `size`.
    fn compute_thread_result(&mut self, size: ImageSize) -> MatchComputeResult;
}

/// The calibration of a stereo pair.
pub trait StereoCalibration {
    /// Whether the calibration can be used.
    fn is_valid(&self) -> bool;

    /// Rectify a raw pair.
    fn rectify(
        &self,
        left: &Image<u8, 3>,
        right: &Image<u8, 3>,
    ) -> Result<StereoImagePair, StereoError>;

    /// The reprojection matrix of the rectified pair.
    fn q(&self) -> ReprojectionMatrix;

    /// The horizontal field of view in radians.
    fn hfov(&self) -> f32;

    /// Adapt the calibration to images downsampled by `factor`.
    fn set_downsample_factor(&mut self, factor: f32);
}

/// Supported stereo camera models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraDeviceType {
    /// The Titania stereo camera.
    Titania,
    /// The Phobos stereo camera.
    Phobos,
    /// A simulated stereo camera.
    StereoTheatreSim,
}

impl CameraDeviceType {
    /// The model name used to identify the device.
    pub fn name(&self) -> &'static str {
        match self {
            CameraDeviceType::Titania => "titania",
            CameraDeviceType::Phobos => "phobos",
            CameraDeviceType::StereoTheatreSim => "stereotheatresim",
        }
    }
}

/// How the camera is attached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraInterfaceType {
    /// A physical camera on USB.
    Usb,
    /// A virtual camera serving test images.
    Virtual,
}

/// Identification of a stereo camera.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraDeviceInfo {
    /// Serial of the left sensor.
    pub left_serial: String,
    /// Serial of the right sensor.
    pub right_serial: String,
    /// The model name.
    pub name: String,
    /// The camera model.
    pub device_type: CameraDeviceType,
    /// How the camera is attached.
    pub interface: CameraInterfaceType,
}

impl CameraDeviceInfo {
    /// Resolve the serials and name of a known camera.
    ///
    /// # Errors
    ///
    /// Returns [`StereoError::UnsupportedDevice`] for physical cameras whose
    /// serials are not known.
    pub fn resolve(
        device_type: CameraDeviceType,
        interface: CameraInterfaceType,
    ) -> Result<Self, StereoError> {
        let (left_serial, right_serial) = match (interface, device_type) {
            (CameraInterfaceType::Virtual, _) => ("0815-0000", "0815-0001"),
            (CameraInterfaceType::Usb, CameraDeviceType::Titania) => ("40091829", "40098273"),
            (CameraInterfaceType::Usb, other) => {
                return Err(StereoError::UnsupportedDevice(format!(
                    "{} over usb",
                    other.name()
                )))
            }
        };

        Ok(Self {
            left_serial: left_serial.to_string(),
            right_serial: right_serial.to_string(),
            name: device_type.name().to_string(),
            device_type,
            interface,
        })
    }
}

/// Available stereo matching algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StereoMatcherType {
    /// Block matching.
    Bm,
    /// Licensed semi-global matching.
    I3drSgm,
}

impl StereoMatcherType {
    /// Pick the licensed matcher when a license is available.
    pub fn select(license_valid: bool) -> Self {
        if license_valid {
            StereoMatcherType::I3drSgm
        } else {
            StereoMatcherType::Bm
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_virtual_serials() -> Result<(), StereoError> {
        let info = CameraDeviceInfo::resolve(CameraDeviceType::Phobos, CameraInterfaceType::Virtual)?;
        assert_eq!(info.left_serial, "0815-0000");
        assert_eq!(info.right_serial, "0815-0001");
        assert_eq!(info.name, "phobos");
        Ok(())
    }

    #[test]
    fn resolve_usb() -> Result<(), StereoError> {
        let info = CameraDeviceInfo::resolve(CameraDeviceType::Titania, CameraInterfaceType::Usb)?;
        assert_eq!(info.left_serial, "40091829");

        let res = CameraDeviceInfo::resolve(CameraDeviceType::Phobos, CameraInterfaceType::Usb);
        assert!(matches!(res, Err(StereoError::UnsupportedDevice(_))));
        Ok(())
    }

    #[test]
    fn matcher_selection() {
        assert_eq!(StereoMatcherType::select(true), StereoMatcherType::I3drSgm);
        assert_eq!(StereoMatcherType::select(false), StereoMatcherType::Bm);
    }

    #[test]
    fn pair_requires_same_size() -> Result<(), StereoError> {
        let left = Image::<u8, 3>::from_size_val([4, 2].into(), 0)?;
        let right = Image::<u8, 3>::from_size_val([2, 2].into(), 0)?;
        assert!(matches!(
            StereoImagePair::new(left, right),
            Err(StereoError::InvalidInput(_))
        ));
        Ok(())
    }
}
