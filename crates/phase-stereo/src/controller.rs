use std::time::{Duration, Instant};

use phase_3d::camera::{check_downsample_factor, CameraParameters, ProjectionHelper};

use crate::{
    cadence::Cadence,
    config::StreamConfig,
    device::{StereoCalibration, StereoCamera, StereoMatcher},
    error::StereoError,
    fps_counter::FpsCounter,
    pipeline::{FramePipeline, PipelineStats, StepStatus},
    scheduler::{MatchScheduler, ReadScheduler, SchedulerAction, SchedulerState},
    sink::FrameSink,
};

/// Interval between worker checks while shutting down.
const TEARDOWN_POLL: Duration = Duration::from_millis(10);

/// What happened during one [`StereoController::update`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Whether the read cadence fired.
    pub read_tick: bool,
    /// The action taken by the read scheduler.
    pub read: Option<SchedulerAction>,
    /// The action taken by the match scheduler.
    pub matched: Option<SchedulerAction>,
    /// The pipeline progress.
    pub status: StepStatus,
    /// A match request was accepted by the match scheduler.
    pub armed: bool,
    /// A depth frame reached the sink.
    pub depth_presented: bool,
}

/// Drives a stereo camera and matcher into a [`FrameSink`].
///
/// The controller owns the devices and runs entirely on the host thread:
/// each [`StereoController::update`] polls the schedulers, hands finished
/// results to the pipeline and advances it by one step. Device work happens
/// on the workers of the device implementations.
///
/// # Example
///
/// ```
/// use phase_image::Image;
/// use phase_3d::reprojection::ReprojectionMatrix;
/// use phase_stereo::{
///     config::StreamConfig,
///     controller::StereoController,
///     device::{CameraDeviceInfo, CameraDeviceType, CameraInterfaceType, StereoMatcherType},
///     sink::PointCloudSink,
///     virtual_device::{StaticCalibration, VirtualStereoCamera, VirtualStereoMatcher},
/// };
///
/// let info = CameraDeviceInfo::resolve(CameraDeviceType::Phobos, CameraInterfaceType::Virtual).unwrap();
/// let image = Image::<u8, 3>::from_size_val([8, 4].into(), 128).unwrap();
/// let camera = VirtualStereoCamera::new(info, image.clone(), image).unwrap();
/// let matcher = VirtualStereoMatcher::new(StereoMatcherType::Bm, 10.0);
/// let calibration = StaticCalibration::new(ReprojectionMatrix::from_stereo(40.0, 4.0, 2.0, 4.0, 0.5), 1.2);
/// let config = StreamConfig::default();
/// let sink = PointCloudSink::new(config.renderer);
///
/// let mut controller = StereoController::new(camera, matcher, calibration, sink, config).unwrap();
/// controller.start().unwrap();
/// controller.update().unwrap();
/// controller.shutdown().unwrap();
/// ```
pub struct StereoController<C, M, K, S>
where
    C: StereoCamera,
    M: StereoMatcher,
    K: StereoCalibration,
    S: FrameSink,
{
    camera: C,
    matcher: M,
    calibration: K,
    sink: S,
    config: StreamConfig,
    read: ReadScheduler,
    matching: MatchScheduler,
    pipeline: FramePipeline,
    cadence: Cadence,
    projection: ProjectionHelper,
    fps: FpsCounter,
    started: bool,
    applied_exposure: u32,
    applied_downsample: f32,
    failure_streak: u32,
    streak_reported: bool,
}

impl<C, M, K, S> StereoController<C, M, K, S>
where
    C: StereoCamera,
    M: StereoMatcher,
    K: StereoCalibration,
    S: FrameSink,
{
    /// Create a stopped controller.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not validate.
    pub fn new(
        camera: C,
        matcher: M,
        calibration: K,
        sink: S,
        config: StreamConfig,
    ) -> Result<Self, StereoError> {
        config.validate()?;

        Ok(Self {
            read: ReadScheduler::new(config.stall_timeout()),
            matching: MatchScheduler::new(config.stall_timeout()),
            pipeline: FramePipeline::new(config.pipeline_options()),
            cadence: Cadence::from_interval(config.read_interval())?,
            projection: ProjectionHelper::new(),
            fps: FpsCounter::new(),
            started: false,
            applied_exposure: config.exposure,
            applied_downsample: config.downsample_factor,
            failure_streak: 0,
            streak_reported: false,
            camera,
            matcher,
            calibration,
            sink,
            config,
        })
    }

    /// Validate the setup, connect the camera and initialise the sink.
    ///
    /// # Errors
    ///
    /// Fails without starting if the calibration is invalid, a configured
    /// file is missing, the camera does not connect or the camera geometry
    /// cannot be derived. The camera is disconnected again on late failures.
    pub fn start(&mut self) -> Result<(), StereoError> {
        if self.started {
            return Ok(());
        }

        if !self.calibration.is_valid() {
            return Err(StereoError::InvalidCalibration);
        }
        self.config.check_files()?;

        self.camera.connect()?;
        if let Err(e) = self.configure_connected() {
            self.camera.disconnect();
            return Err(e);
        }

        self.cadence.reset();
        self.fps.reset();
        self.started = true;
        log::info!(
            "stereo stream started at {} Hz, {}",
            self.config.read_rate_hz,
            self.camera.size()
        );
        Ok(())
    }

    fn configure_connected(&mut self) -> Result<(), StereoError> {
        self.applied_exposure = self.config.exposure;
        self.applied_downsample = check_downsample_factor(self.config.downsample_factor)?;

        self.camera.set_exposure(self.applied_exposure);
        self.camera.set_downsample_factor(self.applied_downsample);
        self.calibration.set_downsample_factor(self.applied_downsample);

        self.refresh_parameters()?;
        self.camera.start_capture()
    }

    fn refresh_parameters(&mut self) -> Result<CameraParameters, StereoError> {
        let (params, aspect_changed) = self.projection.recompute(
            self.camera.size(),
            self.calibration.hfov(),
            self.calibration.q(),
        )?;
        if aspect_changed {
            log::debug!("aspect ratio changed to {:.3}", params.aspect_ratio());
        }
        self.sink.init(params.size, params.horizontal_fov)?;
        Ok(params)
    }

    /// Request a new exposure, applied on the next update.
    pub fn set_exposure(&mut self, exposure: u32) {
        self.config.exposure = exposure;
    }

    /// Request a new downsample factor, applied on the next update.
    pub fn set_downsample_factor(&mut self, factor: f32) -> Result<(), StereoError> {
        self.config.downsample_factor = check_downsample_factor(factor)?;
        Ok(())
    }

    fn apply_parameter_changes(&mut self) -> Result<(), StereoError> {
        if self.config.exposure != self.applied_exposure {
            self.applied_exposure = self.config.exposure;
            self.camera.set_exposure(self.applied_exposure);
            log::info!("exposure set to {}", self.applied_exposure);
        }

        if self.config.downsample_factor != self.applied_downsample {
            self.applied_downsample = self.config.downsample_factor;
            self.camera.set_downsample_factor(self.applied_downsample);
            self.calibration.set_downsample_factor(self.applied_downsample);

            // buffers in flight have the old size
            self.read.reset();
            self.matching.reset();
            self.pipeline.clear();

            let params = self.refresh_parameters()?;
            log::info!(
                "downsample factor set to {}, frames are now {}",
                self.applied_downsample,
                params.size
            );
        }
        Ok(())
    }

    /// Run one update at the current time.
    pub fn update(&mut self) -> Result<TickReport, StereoError> {
        self.update_at(Instant::now())
    }

    /// Run one update at `now`.
    ///
    /// Failures of a single cycle are logged and absorbed; only calling this
    /// on a stopped controller is an error.
    pub fn update_at(&mut self, now: Instant) -> Result<TickReport, StereoError> {
        if !self.started {
            return Err(StereoError::NotConnected);
        }

        let mut report = TickReport::default();

        if let Err(e) = self.apply_parameter_changes() {
            log::warn!("failed to apply camera parameters: {e}");
        }

        if self.cadence.due(now) {
            report.read_tick = true;
            report.read = self.read.poll(&mut self.camera, now);
        }
        self.hand_over_read();

        report.matched = self.matching.poll(&mut self.matcher, now);
        self.hand_over_match();

        // an abandoned job is a lost frame
        for action in [report.read, report.matched] {
            if action == Some(SchedulerAction::Abandon) {
                self.record_failure();
            }
        }

        let mut step = self.pipeline.step(&self.calibration, &mut self.sink);
        report.status = step.status;
        if let Some(request) = step.match_request.take() {
            report.armed = self.matching.arm(request);
        }
        if step.depth_presented {
            report.depth_presented = true;
            self.fps.update_at(now);
            self.record_success();
        }
        for e in step.take_errors() {
            log::warn!("frame processing failed: {e}");
            self.record_failure();
        }

        Ok(report)
    }

    fn hand_over_read(&mut self) {
        if !(self.read.has_result() && self.pipeline.can_accept_read()) {
            return;
        }
        let Some(result) = self.read.take_result() else {
            return;
        };
        match self.pipeline.submit_read(result, self.camera.size()) {
            Ok(true) => {}
            Ok(false) => self.record_failure(),
            Err(e) => {
                log::warn!("dropping frame: {e}");
                self.record_failure();
            }
        }
    }

    fn hand_over_match(&mut self) {
        if !(self.matching.has_result() && self.pipeline.can_accept_compute()) {
            return;
        }
        let Some(outcome) = self.matching.take_result() else {
            return;
        };
        match self.pipeline.submit_compute(outcome) {
            Ok(true) => {}
            Ok(false) => self.record_failure(),
            Err(e) => {
                log::warn!("dropping disparity: {e}");
                self.record_failure();
            }
        }
    }

    fn record_failure(&mut self) {
        self.failure_streak += 1;
        if self.failure_streak >= self.config.max_consecutive_failures && !self.streak_reported {
            log::error!(
                "{} consecutive frames failed, check the camera and matcher",
                self.failure_streak
            );
            self.streak_reported = true;
        }
    }

    fn record_success(&mut self) {
        self.failure_streak = 0;
        self.streak_reported = false;
    }

    /// Wait for workers, then disconnect the camera.
    ///
    /// Waits at most the configured teardown timeout. The camera is
    /// disconnected and the controller stopped in any case.
    ///
    /// # Errors
    ///
    /// Returns [`StereoError::TeardownTimeout`] naming the workers still
    /// running when the wait ran out; they are left detached.
    pub fn shutdown(&mut self) -> Result<(), StereoError> {
        if !self.started {
            return Ok(());
        }

        let deadline = Instant::now() + self.config.teardown_timeout();
        let busy = loop {
            let mut busy = Vec::new();
            if self.camera.is_read_thread_running() {
                busy.push("read");
            }
            if self.matcher.is_compute_thread_running() {
                busy.push("match");
            }
            if busy.is_empty() || Instant::now() >= deadline {
                break busy;
            }
            std::thread::sleep(TEARDOWN_POLL);
        };

        self.camera.disconnect();
        self.read.reset();
        self.matching.reset();
        self.pipeline.clear();
        self.started = false;
        log::info!("stereo stream stopped after {} frames", self.fps.frame_count());

        if busy.is_empty() {
            Ok(())
        } else {
            Err(StereoError::TeardownTimeout(busy.join(", ")))
        }
    }

    /// Whether the stream is running.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// The camera.
    pub fn camera(&self) -> &C {
        &self.camera
    }

    /// The matcher.
    pub fn matcher(&self) -> &M {
        &self.matcher
    }

    /// The calibration.
    pub fn calibration(&self) -> &K {
        &self.calibration
    }

    /// The sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// The sink, mutably.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// The configuration with any requested changes.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// The camera parameters derived at start or after the last downsample change.
    pub fn parameters(&self) -> Option<&CameraParameters> {
        self.projection.parameters()
    }

    /// The processed depth frame rate.
    pub fn fps(&self) -> &FpsCounter {
        &self.fps
    }

    /// The state of the read scheduler.
    pub fn read_state(&self) -> SchedulerState {
        self.read.state()
    }

    /// The state of the match scheduler.
    pub fn match_state(&self) -> SchedulerState {
        self.matching.state()
    }

    /// The read scheduler.
    pub fn read_scheduler(&self) -> &ReadScheduler {
        &self.read
    }

    /// The match scheduler.
    pub fn match_scheduler(&self) -> &MatchScheduler {
        &self.matching
    }

    /// The pipeline counters.
    pub fn pipeline_stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    /// Invalid or failed cycles since the last presented depth frame.
    pub fn failure_streak(&self) -> u32 {
        self.failure_streak
    }

    /// Ticks dropped because updates came too late.
    pub fn missed_ticks(&self) -> u64 {
        self.cadence.missed()
    }
}

impl<C, M, K, S> Drop for StereoController<C, M, K, S>
where
    C: StereoCamera,
    M: StereoMatcher,
    K: StereoCalibration,
    S: FrameSink,
{
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("error while shutting down the stereo stream: {e}");
        }
    }
}
