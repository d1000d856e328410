#![allow(dead_code)]

use std::cell::Cell;

use phase_3d::{camera::downsampled_size, reprojection::ReprojectionMatrix};
use phase_image::{Image, ImageSize};
use phase_stereo::{
    device::{
        FrameReadResult, MatchComputeResult, StereoCamera, StereoImagePair, StereoMatcher,
    },
    scheduler::MatchRequest,
    sink::FrameSink,
    virtual_device::StaticCalibration,
    StereoError,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn size() -> ImageSize {
    ImageSize {
        width: 4,
        height: 2,
    }
}

pub fn calibration() -> StaticCalibration {
    StaticCalibration::new(ReprojectionMatrix::from_stereo(100.0, 2.0, 1.0, 2.0, 0.1), 1.0)
}

pub fn bgr(size: ImageSize, pixel: [u8; 3]) -> Vec<u8> {
    pixel.repeat(size.area())
}

/// A camera whose read stays busy for a fixed number of polls.
pub struct MockCamera {
    pub base_size: ImageSize,
    pub connected: bool,
    pub fail_connect: bool,
    pub valid: bool,
    pub pixel: [u8; 3],
    pub busy_polls: usize,
    pub remaining: Cell<usize>,
    pub in_flight: bool,
    pub starts: usize,
    pub results: usize,
    pub running_checks: Cell<usize>,
    pub exposure: u32,
    pub downsample: f32,
}

impl MockCamera {
    pub fn new(busy_polls: usize) -> Self {
        let size = size();
        Self {
            base_size: size,
            connected: false,
            fail_connect: false,
            valid: true,
            pixel: [10, 20, 30],
            busy_polls,
            remaining: Cell::new(0),
            in_flight: false,
            starts: 0,
            results: 0,
            running_checks: Cell::new(0),
            exposure: 0,
            downsample: 1.0,
        }
    }

    pub fn connected(mut self) -> Self {
        self.connected = true;
        self
    }
}

impl StereoCamera for MockCamera {
    fn connect(&mut self) -> Result<(), StereoError> {
        if self.fail_connect {
            return Err(StereoError::ConnectFailed);
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn width(&self) -> usize {
        downsampled_size(self.base_size, self.downsample).width
    }

    fn height(&self) -> usize {
        downsampled_size(self.base_size, self.downsample).height
    }

    fn set_exposure(&mut self, exposure: u32) {
        self.exposure = exposure;
    }

    fn set_downsample_factor(&mut self, factor: f32) {
        self.downsample = factor;
    }

    fn start_read_thread(&mut self) {
        self.starts += 1;
        self.in_flight = true;
        self.remaining.set(self.busy_polls);
    }

    fn is_read_thread_running(&self) -> bool {
        self.running_checks.set(self.running_checks.get() + 1);
        if !self.in_flight {
            return false;
        }
        let remaining = self.remaining.get();
        if remaining > 0 {
            self.remaining.set(remaining - 1);
            true
        } else {
            false
        }
    }

    fn read_thread_result(&mut self) -> FrameReadResult {
        self.results += 1;
        self.in_flight = false;
        if !self.valid {
            return FrameReadResult::invalid();
        }
        let pixels = bgr(downsampled_size(self.base_size, self.downsample), self.pixel);
        FrameReadResult::new(pixels.clone(), pixels)
    }
}

/// A matcher whose match stays busy for a fixed number of polls.
pub struct MockMatcher {
    pub disparity: f32,
    pub valid: bool,
    pub busy_polls: usize,
    pub remaining: Cell<usize>,
    pub in_flight: bool,
    pub starts: usize,
    pub results: usize,
}

impl MockMatcher {
    pub fn new(disparity: f32, busy_polls: usize) -> Self {
        Self {
            disparity,
            valid: true,
            busy_polls,
            remaining: Cell::new(0),
            in_flight: false,
            starts: 0,
            results: 0,
        }
    }
}

impl StereoMatcher for MockMatcher {
    fn start_compute_thread(&mut self, _pair: StereoImagePair) {
        self.starts += 1;
        self.in_flight = true;
        self.remaining.set(self.busy_polls);
    }

    fn is_compute_thread_running(&self) -> bool {
        if !self.in_flight {
            return false;
        }
        let remaining = self.remaining.get();
        if remaining > 0 {
            self.remaining.set(remaining - 1);
            true
        } else {
            false
        }
    }

    fn compute_thread_result(&mut self, size: ImageSize) -> MatchComputeResult {
        self.results += 1;
        self.in_flight = false;
        if self.valid {
            MatchComputeResult::new(vec![self.disparity; size.area()])
        } else {
            MatchComputeResult::invalid()
        }
    }
}

/// A sink recording every call.
#[derive(Default)]
pub struct RecordingSink {
    pub inits: Vec<(ImageSize, f32)>,
    pub buffers: Vec<(Image<u8, 4>, Image<f32, 1>)>,
    pub stereo_updates: usize,
    pub disparity_updates: usize,
    pub fail_buffers: bool,
}

impl FrameSink for RecordingSink {
    fn init(&mut self, size: ImageSize, horizontal_fov: f32) -> Result<(), StereoError> {
        self.inits.push((size, horizontal_fov));
        Ok(())
    }

    fn update_buffers(
        &mut self,
        color: &Image<u8, 4>,
        depth: &Image<f32, 1>,
    ) -> Result<(), StereoError> {
        if self.fail_buffers {
            return Err(StereoError::SinkNotInitialized);
        }
        self.buffers.push((color.clone(), depth.clone()));
        Ok(())
    }

    fn update_stereo_images(
        &mut self,
        _left: &Image<u8, 4>,
        _right: &Image<u8, 4>,
    ) -> Result<(), StereoError> {
        self.stereo_updates += 1;
        Ok(())
    }

    fn update_disparity_image(&mut self, _disparity: &Image<u8, 4>) -> Result<(), StereoError> {
        self.disparity_updates += 1;
        Ok(())
    }
}

pub fn match_request(value: u8) -> Result<MatchRequest, StereoError> {
    let img = Image::<u8, 3>::from_size_val(size(), value)?;
    Ok(MatchRequest {
        pair: StereoImagePair::new(img.clone(), img)?,
        color: Image::from_size_val(size(), value)?,
    })
}
