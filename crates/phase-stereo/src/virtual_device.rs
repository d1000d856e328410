use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use phase_3d::{camera::downsampled_size, reprojection::ReprojectionMatrix};
use phase_image::{Image, ImageSize};
use phase_imgproc::resize::resize_nearest;

use crate::{
    device::{
        CameraDeviceInfo, CameraInterfaceType, FrameReadResult, MatchComputeResult,
        StereoCalibration, StereoCamera, StereoImagePair, StereoMatcher, StereoMatcherType,
    },
    error::StereoError,
};

fn is_finished<T>(worker: &Option<JoinHandle<T>>) -> bool {
    worker.as_ref().is_some_and(|h| h.is_finished())
}

/// Take the result of a finished worker, leaving a running one in place.
fn join_finished<T>(worker: &mut Option<JoinHandle<T>>, name: &str) -> Option<T> {
    if !is_finished(worker) {
        return None;
    }
    match worker.take()?.join() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("{name} worker panicked");
            None
        }
    }
}

/// A stereo camera serving a fixed pair of images from a worker thread.
pub struct VirtualStereoCamera {
    info: CameraDeviceInfo,
    left: Arc<Image<u8, 3>>,
    right: Arc<Image<u8, 3>>,
    connected: bool,
    exposure: u32,
    downsample_factor: f32,
    latency: Duration,
    worker: Option<JoinHandle<FrameReadResult>>,
}

impl VirtualStereoCamera {
    /// Create a virtual camera serving `left` and `right`.
    ///
    /// # Errors
    ///
    /// Returns [`StereoError::UnsupportedDevice`] unless `info` describes a
    /// virtual device, and [`StereoError::InvalidInput`] if the images differ
    /// in size.
    pub fn new(
        info: CameraDeviceInfo,
        left: Image<u8, 3>,
        right: Image<u8, 3>,
    ) -> Result<Self, StereoError> {
        if info.interface != CameraInterfaceType::Virtual {
            return Err(StereoError::UnsupportedDevice(format!(
                "{} is not a virtual device",
                info.name
            )));
        }
        left.ensure_same_size(&right)?;

        Ok(Self {
            info,
            left: Arc::new(left),
            right: Arc::new(right),
            connected: false,
            exposure: 0,
            downsample_factor: 1.0,
            latency: Duration::ZERO,
            worker: None,
        })
    }

    /// Create a virtual camera from two raw BGR files of `size` pixels.
    pub fn from_raw_files(
        info: CameraDeviceInfo,
        size: ImageSize,
        left: impl AsRef<Path>,
        right: impl AsRef<Path>,
    ) -> Result<Self, StereoError> {
        let read = |path: &Path| -> Result<Image<u8, 3>, StereoError> {
            if !path.exists() {
                return Err(StereoError::MissingFile {
                    kind: "image",
                    path: path.to_path_buf(),
                });
            }
            Ok(Image::new(size, std::fs::read(path)?)?)
        };
        Self::new(info, read(left.as_ref())?, read(right.as_ref())?)
    }

    /// Delay every read by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// The device identification.
    pub fn info(&self) -> &CameraDeviceInfo {
        &self.info
    }

    /// The exposure last set.
    pub fn exposure(&self) -> u32 {
        self.exposure
    }

    /// The downsample factor last set.
    pub fn downsample_factor(&self) -> f32 {
        self.downsample_factor
    }
}

impl StereoCamera for VirtualStereoCamera {
    fn connect(&mut self) -> Result<(), StereoError> {
        if !self.connected {
            log::info!(
                "connected to virtual {} ({}, {})",
                self.info.name,
                self.info.left_serial,
                self.info.right_serial
            );
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.connected {
            log::info!("disconnected from virtual {}", self.info.name);
        }
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn width(&self) -> usize {
        downsampled_size(self.left.size(), self.downsample_factor).width
    }

    fn height(&self) -> usize {
        downsampled_size(self.left.size(), self.downsample_factor).height
    }

    fn set_exposure(&mut self, exposure: u32) {
        self.exposure = exposure;
    }

    fn set_downsample_factor(&mut self, factor: f32) {
        self.downsample_factor = factor;
    }

    fn start_read_thread(&mut self) {
        if !self.connected {
            log::warn!("read requested on disconnected virtual camera");
            return;
        }
        if self.is_read_thread_running() {
            return;
        }

        let (left, right) = (Arc::clone(&self.left), Arc::clone(&self.right));
        let size = self.size();
        let latency = self.latency;

        self.worker = Some(std::thread::spawn(move || {
            std::thread::sleep(latency);
            let scale = |src: &Image<u8, 3>| -> Option<Vec<u8>> {
                if src.size() == size {
                    return Some(src.as_slice().to_vec());
                }
                let mut dst = Image::from_size_val(size, 0u8).ok()?;
                resize_nearest(src, &mut dst).ok()?;
                Some(dst.into_vec())
            };
            match (scale(left.as_ref()), scale(right.as_ref())) {
                (Some(l), Some(r)) => FrameReadResult::new(l, r),
                _ => FrameReadResult::invalid(),
            }
        }));
    }

    fn is_read_thread_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn read_thread_result(&mut self) -> FrameReadResult {
        join_finished(&mut self.worker, "read").unwrap_or_else(FrameReadResult::invalid)
    }
}

impl Drop for VirtualStereoCamera {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// A stereo matcher answering every pair with a constant disparity.
pub struct VirtualStereoMatcher {
    matcher_type: StereoMatcherType,
    disparity: f32,
    latency: Duration,
    worker: Option<JoinHandle<Vec<f32>>>,
}

impl VirtualStereoMatcher {
    /// Create a matcher producing `disparity` for every pixel.
    pub fn new(matcher_type: StereoMatcherType, disparity: f32) -> Self {
        Self {
            matcher_type,
            disparity,
            latency: Duration::ZERO,
            worker: None,
        }
    }

    /// Delay every match by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// The algorithm this matcher stands in for.
    pub fn matcher_type(&self) -> StereoMatcherType {
        self.matcher_type
    }
}

impl StereoMatcher for VirtualStereoMatcher {
    fn start_compute_thread(&mut self, pair: StereoImagePair) {
        if self.is_compute_thread_running() {
            return;
        }

        let (disparity, latency) = (self.disparity, self.latency);
        self.worker = Some(std::thread::spawn(move || {
            std::thread::sleep(latency);
            vec![disparity; pair.size().area()]
        }));
    }

    fn is_compute_thread_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn compute_thread_result(&mut self, size: ImageSize) -> MatchComputeResult {
        match join_finished(&mut self.worker, "match") {
            Some(disparity) if disparity.len() == size.area() => MatchComputeResult::new(disparity),
            Some(_) => {
                log::warn!("match result does not cover a {size} image");
                MatchComputeResult::invalid()
            }
            None => MatchComputeResult::invalid(),
        }
    }
}

/// Calibration values as stored on disk.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFile {
    /// The reprojection matrix at full resolution.
    pub q: ReprojectionMatrix,
    /// The horizontal field of view in radians.
    pub hfov: f32,
}

/// A calibration of an already rectified pair.
///
/// Rectification copies the images through; Q is rescaled on downsampling.
#[derive(Clone, Debug, PartialEq)]
pub struct StaticCalibration {
    base_q: ReprojectionMatrix,
    q: ReprojectionMatrix,
    hfov: f32,
}

impl StaticCalibration {
    /// Create a calibration from a full resolution Q and field of view.
    pub fn new(q: ReprojectionMatrix, hfov: f32) -> Self {
        Self {
            base_q: q,
            q,
            hfov,
        }
    }

    /// Load a calibration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, StereoError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StereoError::MissingFile {
                kind: "calibration",
                path: path.to_path_buf(),
            });
        }
        let file: CalibrationFile = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        Ok(Self::new(file.q, file.hfov))
    }
}

impl StereoCalibration for StaticCalibration {
    fn is_valid(&self) -> bool {
        self.hfov > 0.0
            && self.hfov < std::f32::consts::PI
            && self.base_q.to_array().iter().all(|v| v.is_finite())
    }

    fn rectify(
        &self,
        left: &Image<u8, 3>,
        right: &Image<u8, 3>,
    ) -> Result<StereoImagePair, StereoError> {
        StereoImagePair::new(left.clone(), right.clone())
    }

    fn q(&self) -> ReprojectionMatrix {
        self.q
    }

    fn hfov(&self) -> f32 {
        self.hfov
    }

    fn set_downsample_factor(&mut self, factor: f32) {
        self.q = self.base_q.scaled(factor);
    }
}
