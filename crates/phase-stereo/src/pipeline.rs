use phase_3d::depth::disparity_to_depth;
use phase_image::{Image, ImageSize};
use phase_imgproc::{
    color::{bgr_to_rgba, gray_to_rgba},
    flip::{flip, FlipAxis},
    normalize::{disparity_to_gray, DisparityRange},
};

use crate::{
    device::{FrameReadResult, StereoCalibration, StereoImagePair},
    error::StereoError,
    scheduler::{MatchOutcome, MatchRequest},
    sink::FrameSink,
};

/// How raw buffers are turned into display buffers.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PipelineOptions {
    /// The flip turning device order into display order.
    pub display_flip: FlipAxis,
    /// The disparity range mapped onto the preview grays.
    pub disparity_range: DisparityRange,
}

/// Progress reported by [`FramePipeline::step`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StepStatus {
    /// No job was active.
    #[default]
    Idle,
    /// At least one job has stages left.
    Pending,
    /// The last active job finished in this step.
    Done,
}

/// The outcome of one pipeline step.
///
/// A step always reports what both jobs produced, even when one of them
/// failed and was dropped.
#[derive(Debug, Default)]
pub struct PipelineStep {
    /// Whether work remains.
    pub status: StepStatus,
    /// The match request emitted when a read job finished.
    pub match_request: Option<MatchRequest>,
    /// A read job presented the stereo preview.
    pub stereo_presented: bool,
    /// A compute job presented color and depth to the sink.
    pub depth_presented: bool,
    /// The error that dropped the read job in this step.
    pub read_error: Option<StereoError>,
    /// The error that dropped the compute job in this step.
    pub compute_error: Option<StereoError>,
}

impl PipelineStep {
    /// Whether a job was dropped in this step.
    pub fn has_errors(&self) -> bool {
        self.read_error.is_some() || self.compute_error.is_some()
    }

    /// Take the errors of this step, read job first.
    pub fn take_errors(&mut self) -> Vec<StereoError> {
        [self.read_error.take(), self.compute_error.take()]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Counters kept by the pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Read jobs that reached the sink.
    pub reads_presented: u64,
    /// Compute jobs that reached the sink.
    pub depths_presented: u64,
    /// Results skipped because they were marked invalid.
    pub skipped_invalid: u64,
    /// Jobs dropped because a stage failed.
    pub failed: u64,
}

enum ReadStage {
    Rectify {
        left: Image<u8, 3>,
        right: Image<u8, 3>,
    },
    Convert {
        rectified: StereoImagePair,
        left: Image<u8, 3>,
        right: Image<u8, 3>,
        color: Image<u8, 3>,
    },
    Present {
        rectified: StereoImagePair,
        left: Image<u8, 4>,
        right: Image<u8, 4>,
        color: Image<u8, 4>,
    },
}

enum ComputeStage {
    Flip {
        disparity: Image<f32, 1>,
        color: Image<u8, 4>,
    },
    Normalize {
        disparity: Image<f32, 1>,
        color: Image<u8, 4>,
    },
    Depth {
        disparity: Image<f32, 1>,
        color: Image<u8, 4>,
        preview: Image<u8, 4>,
    },
    Present {
        color: Image<u8, 4>,
        depth: Image<f32, 1>,
        preview: Image<u8, 4>,
    },
}

/// Turns raw read and match results into display buffers over several steps.
///
/// A read job flips and rectifies the raw pair, converts it to RGBA, then
/// presents the preview and emits a [`MatchRequest`]. A compute job flips the
/// disparity, normalizes it for preview, computes depth, then presents color
/// and depth to the sink. Each [`FramePipeline::step`] advances every active
/// job by one stage. At most one job of each kind exists at a time.
pub struct FramePipeline {
    options: PipelineOptions,
    read_job: Option<ReadStage>,
    compute_job: Option<ComputeStage>,
    stats: PipelineStats,
}

impl FramePipeline {
    /// Create an empty pipeline.
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            options,
            read_job: None,
            compute_job: None,
            stats: PipelineStats::default(),
        }
    }

    /// The pipeline options.
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// The pipeline counters.
    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Whether a read result would be accepted.
    pub fn can_accept_read(&self) -> bool {
        self.read_job.is_none()
    }

    /// Whether a match outcome would be accepted.
    pub fn can_accept_compute(&self) -> bool {
        self.compute_job.is_none()
    }

    /// Whether any job is active.
    pub fn is_busy(&self) -> bool {
        self.read_job.is_some() || self.compute_job.is_some()
    }

    /// Hand a raw read to the pipeline.
    ///
    /// Returns `Ok(false)` without doing any work if the read is invalid.
    ///
    /// # Errors
    ///
    /// Returns [`StereoError::PipelineBusy`] if a read job is active and
    /// [`StereoError::InvalidInput`] if a buffer does not hold `size` BGR pixels.
    pub fn submit_read(
        &mut self,
        result: FrameReadResult,
        size: ImageSize,
    ) -> Result<bool, StereoError> {
        if !result.valid {
            self.stats.skipped_invalid += 1;
            return Ok(false);
        }
        if self.read_job.is_some() {
            return Err(StereoError::PipelineBusy("read"));
        }

        let left = Image::new(size, result.left)?;
        let right = Image::new(size, result.right)?;
        self.read_job = Some(ReadStage::Rectify { left, right });
        Ok(true)
    }

    /// Hand a finished match to the pipeline.
    ///
    /// Returns `Ok(false)` without doing any work if the match is invalid.
    ///
    /// # Errors
    ///
    /// Returns [`StereoError::PipelineBusy`] if a compute job is active and
    /// [`StereoError::InvalidInput`] if the disparity or color does not match
    /// the outcome size.
    pub fn submit_compute(&mut self, outcome: MatchOutcome) -> Result<bool, StereoError> {
        if !outcome.result.valid {
            self.stats.skipped_invalid += 1;
            return Ok(false);
        }
        if self.compute_job.is_some() {
            return Err(StereoError::PipelineBusy("compute"));
        }

        let disparity = Image::new(outcome.size, outcome.result.disparity)?;
        outcome.color.ensure_same_size(&disparity)?;
        self.compute_job = Some(ComputeStage::Flip {
            disparity,
            color: outcome.color,
        });
        Ok(true)
    }

    /// Advance every active job by one stage.
    ///
    /// A failing stage drops its job and records the error in the returned
    /// step. The other job still advances and its output is kept.
    pub fn step<K, S>(&mut self, calibration: &K, sink: &mut S) -> PipelineStep
    where
        K: StereoCalibration + ?Sized,
        S: FrameSink + ?Sized,
    {
        let was_busy = self.is_busy();
        let mut step = PipelineStep::default();

        if let Err(e) = self.step_read(calibration, sink, &mut step) {
            step.read_error = Some(e);
        }
        if let Err(e) = self.step_compute(calibration, sink, &mut step) {
            step.compute_error = Some(e);
        }

        step.status = match (was_busy, self.is_busy()) {
            (_, true) => StepStatus::Pending,
            (true, false) => StepStatus::Done,
            (false, false) => StepStatus::Idle,
        };

        step
    }

    /// Drop all active jobs.
    pub fn clear(&mut self) {
        self.read_job = None;
        self.compute_job = None;
    }

    fn step_read<K, S>(
        &mut self,
        calibration: &K,
        sink: &mut S,
        step: &mut PipelineStep,
    ) -> Result<(), StereoError>
    where
        K: StereoCalibration + ?Sized,
        S: FrameSink + ?Sized,
    {
        let Some(stage) = self.read_job.take() else {
            return Ok(());
        };

        match self.advance_read(stage, calibration, sink, step) {
            Ok(next) => {
                self.read_job = next;
                Ok(())
            }
            Err(e) => {
                self.stats.failed += 1;
                Err(e)
            }
        }
    }

    fn advance_read<K, S>(
        &mut self,
        stage: ReadStage,
        calibration: &K,
        sink: &mut S,
        step: &mut PipelineStep,
    ) -> Result<Option<ReadStage>, StereoError>
    where
        K: StereoCalibration + ?Sized,
        S: FrameSink + ?Sized,
    {
        let axis = self.options.display_flip;

        let next = match stage {
            ReadStage::Rectify { left, right } => {
                let rectified = calibration.rectify(&left, &right)?;
                ReadStage::Convert {
                    left: flip(&left, axis)?,
                    right: flip(&right, axis)?,
                    color: flip(&rectified.left, axis)?,
                    rectified,
                }
            }
            ReadStage::Convert {
                rectified,
                left,
                right,
                color,
            } => ReadStage::Present {
                rectified,
                left: bgr_to_rgba(&left)?,
                right: bgr_to_rgba(&right)?,
                color: bgr_to_rgba(&color)?,
            },
            ReadStage::Present {
                rectified,
                left,
                right,
                color,
            } => {
                sink.update_stereo_images(&left, &right)?;
                step.stereo_presented = true;
                step.match_request = Some(MatchRequest {
                    pair: rectified,
                    color,
                });
                self.stats.reads_presented += 1;
                return Ok(None);
            }
        };

        Ok(Some(next))
    }

    fn step_compute<K, S>(
        &mut self,
        calibration: &K,
        sink: &mut S,
        step: &mut PipelineStep,
    ) -> Result<(), StereoError>
    where
        K: StereoCalibration + ?Sized,
        S: FrameSink + ?Sized,
    {
        let Some(stage) = self.compute_job.take() else {
            return Ok(());
        };

        match self.advance_compute(stage, calibration, sink, step) {
            Ok(next) => {
                self.compute_job = next;
                Ok(())
            }
            Err(e) => {
                self.stats.failed += 1;
                Err(e)
            }
        }
    }

    fn advance_compute<K, S>(
        &mut self,
        stage: ComputeStage,
        calibration: &K,
        sink: &mut S,
        step: &mut PipelineStep,
    ) -> Result<Option<ComputeStage>, StereoError>
    where
        K: StereoCalibration + ?Sized,
        S: FrameSink + ?Sized,
    {
        let next = match stage {
            ComputeStage::Flip { disparity, color } => ComputeStage::Normalize {
                disparity: flip(&disparity, self.options.display_flip)?,
                color,
            },
            ComputeStage::Normalize { disparity, color } => {
                let gray = disparity_to_gray(&disparity, self.options.disparity_range)?;
                ComputeStage::Depth {
                    preview: gray_to_rgba(&gray)?,
                    disparity,
                    color,
                }
            }
            ComputeStage::Depth {
                disparity,
                color,
                preview,
            } => ComputeStage::Present {
                depth: disparity_to_depth(&disparity, &calibration.q())?,
                color,
                preview,
            },
            ComputeStage::Present {
                color,
                depth,
                preview,
            } => {
                sink.update_buffers(&color, &depth)?;
                sink.update_disparity_image(&preview)?;
                step.depth_presented = true;
                self.stats.depths_presented += 1;
                return Ok(None);
            }
        };

        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MatchComputeResult;
    use phase_3d::reprojection::ReprojectionMatrix;

    struct PassThrough;

    impl StereoCalibration for PassThrough {
        fn is_valid(&self) -> bool {
            true
        }

        fn rectify(
            &self,
            left: &Image<u8, 3>,
            right: &Image<u8, 3>,
        ) -> Result<StereoImagePair, StereoError> {
            StereoImagePair::new(left.clone(), right.clone())
        }

        fn q(&self) -> ReprojectionMatrix {
            ReprojectionMatrix::from_stereo(100.0, 2.0, 1.0, 2.0, 0.1)
        }

        fn hfov(&self) -> f32 {
            1.0
        }

        fn set_downsample_factor(&mut self, _factor: f32) {}
    }

    /// Rejects every frame at the rectification stage.
    struct BrokenRectify;

    impl StereoCalibration for BrokenRectify {
        fn is_valid(&self) -> bool {
            false
        }

        fn rectify(
            &self,
            _left: &Image<u8, 3>,
            _right: &Image<u8, 3>,
        ) -> Result<StereoImagePair, StereoError> {
            Err(StereoError::InvalidCalibration)
        }

        fn q(&self) -> ReprojectionMatrix {
            PassThrough.q()
        }

        fn hfov(&self) -> f32 {
            1.0
        }

        fn set_downsample_factor(&mut self, _factor: f32) {}
    }

    #[derive(Default)]
    struct Recorder {
        stereo: usize,
        buffers: Vec<(Image<u8, 4>, Image<f32, 1>)>,
        disparity: usize,
        fail_buffers: bool,
    }

    impl FrameSink for Recorder {
        fn init(&mut self, _size: ImageSize, _hfov: f32) -> Result<(), StereoError> {
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
            self.stereo += 1;
            Ok(())
        }

        fn update_disparity_image(&mut self, _disparity: &Image<u8, 4>) -> Result<(), StereoError> {
            self.disparity += 1;
            Ok(())
        }
    }

    fn size() -> ImageSize {
        ImageSize {
            width: 4,
            height: 2,
        }
    }

    fn bgr_frame() -> FrameReadResult {
        let pixels: Vec<u8> = [10u8, 20, 30].repeat(8);
        FrameReadResult::new(pixels.clone(), pixels)
    }

    fn match_outcome(disparity: f32) -> Result<MatchOutcome, StereoError> {
        Ok(MatchOutcome {
            result: MatchComputeResult::new(vec![disparity; 8]),
            color: Image::from_size_val(size(), 7)?,
            size: size(),
        })
    }

    #[test]
    fn invalid_results_do_nothing() -> Result<(), StereoError> {
        let mut pipeline = FramePipeline::new(PipelineOptions::default());
        let mut sink = Recorder::default();

        assert!(!pipeline.submit_read(FrameReadResult::invalid(), size())?);
        let outcome = MatchOutcome {
            result: MatchComputeResult::invalid(),
            color: Image::from_size_val(size(), 0)?,
            size: size(),
        };
        assert!(!pipeline.submit_compute(outcome)?);

        let step = pipeline.step(&PassThrough, &mut sink);
        assert_eq!(step.status, StepStatus::Idle);
        assert_eq!(sink.stereo + sink.disparity + sink.buffers.len(), 0);
        assert_eq!(pipeline.stats().skipped_invalid, 2);
        Ok(())
    }

    #[test]
    fn read_job_emits_match_request() -> Result<(), StereoError> {
        let mut pipeline = FramePipeline::new(PipelineOptions::default());
        let mut sink = Recorder::default();

        assert!(pipeline.submit_read(bgr_frame(), size())?);
        assert!(matches!(
            pipeline.submit_read(bgr_frame(), size()),
            Err(StereoError::PipelineBusy("read"))
        ));

        assert_eq!(pipeline.step(&PassThrough, &mut sink).status, StepStatus::Pending);
        assert_eq!(pipeline.step(&PassThrough, &mut sink).status, StepStatus::Pending);
        assert_eq!(sink.stereo, 0);

        let step = pipeline.step(&PassThrough, &mut sink);
        assert_eq!(step.status, StepStatus::Done);
        assert_eq!(sink.stereo, 1);

        let request = step.match_request.ok_or(StereoError::NotConnected)?;
        assert_eq!(request.pair.size(), size());
        for px in request.color.as_slice().chunks_exact(4) {
            assert_eq!(px, &[30, 20, 10, 255]);
        }
        Ok(())
    }

    #[test]
    fn compute_job_presents_depth() -> Result<(), StereoError> {
        let mut pipeline = FramePipeline::new(PipelineOptions::default());
        let mut sink = Recorder::default();

        let mut disparity = vec![-1.0f32; 8];
        disparity[0] = 50.0;
        let outcome = MatchOutcome {
            result: MatchComputeResult::new(disparity),
            color: Image::from_size_val(size(), 7)?,
            size: size(),
        };
        assert!(pipeline.submit_compute(outcome)?);

        for _ in 0..3 {
            assert_eq!(pipeline.step(&PassThrough, &mut sink).status, StepStatus::Pending);
        }
        let step = pipeline.step(&PassThrough, &mut sink);
        assert!(step.depth_presented);
        assert_eq!(sink.disparity, 1);

        let (color, depth) = &sink.buffers[0];
        assert_eq!(color.size(), size());
        assert_eq!(depth.as_slice().len(), 8);

        // the valid pixel moved from the top row to the bottom row
        let z = depth.as_slice();
        assert!((z[4] - 0.2).abs() < 1e-5);
        assert_eq!(z.iter().filter(|&&v| v == 0.0).count(), 7);
        Ok(())
    }

    #[test]
    fn mismatched_buffers_rejected() -> Result<(), StereoError> {
        let mut pipeline = FramePipeline::new(PipelineOptions::default());
        let short = FrameReadResult::new(vec![0; 5], vec![0; 24]);
        assert!(matches!(
            pipeline.submit_read(short, size()),
            Err(StereoError::InvalidInput(_))
        ));
        assert!(pipeline.can_accept_read());

        let outcome = MatchOutcome {
            result: MatchComputeResult::new(vec![1.0; 8]),
            color: Image::from_size_val([2, 2].into(), 0)?,
            size: size(),
        };
        assert!(matches!(
            pipeline.submit_compute(outcome),
            Err(StereoError::InvalidInput(_))
        ));
        assert!(pipeline.can_accept_compute());
        Ok(())
    }

    #[test]
    fn failed_compute_keeps_read_request() -> Result<(), StereoError> {
        let mut pipeline = FramePipeline::new(PipelineOptions::default());
        let mut sink = Recorder {
            fail_buffers: true,
            ..Default::default()
        };

        // the read reaches its present stage together with the compute job
        assert!(pipeline.submit_compute(match_outcome(50.0)?)?);
        assert!(!pipeline.step(&PassThrough, &mut sink).has_errors());
        assert!(pipeline.submit_read(bgr_frame(), size())?);
        for _ in 0..2 {
            assert!(!pipeline.step(&PassThrough, &mut sink).has_errors());
        }

        let mut step = pipeline.step(&PassThrough, &mut sink);
        assert_eq!(step.status, StepStatus::Done);
        assert!(step.stereo_presented);
        assert!(!step.depth_presented);
        assert!(step.read_error.is_none());
        assert!(matches!(
            step.compute_error,
            Some(StereoError::SinkNotInitialized)
        ));

        let request = step.match_request.take().ok_or(StereoError::NotConnected)?;
        assert_eq!(request.pair.size(), size());
        assert_eq!(step.take_errors().len(), 1);

        assert_eq!(sink.stereo, 1);
        assert!(sink.buffers.is_empty());
        assert_eq!(pipeline.stats().reads_presented, 1);
        assert_eq!(pipeline.stats().failed, 1);
        assert!(!pipeline.is_busy());
        Ok(())
    }

    #[test]
    fn failed_read_keeps_depth() -> Result<(), StereoError> {
        let mut pipeline = FramePipeline::new(PipelineOptions::default());
        let mut sink = Recorder::default();

        assert!(pipeline.submit_compute(match_outcome(50.0)?)?);
        for _ in 0..3 {
            pipeline.step(&BrokenRectify, &mut sink);
        }
        assert!(pipeline.submit_read(bgr_frame(), size())?);

        let step = pipeline.step(&BrokenRectify, &mut sink);
        assert!(step.depth_presented);
        assert!(step.match_request.is_none());
        assert!(matches!(
            step.read_error,
            Some(StereoError::InvalidCalibration)
        ));
        assert!(step.compute_error.is_none());

        assert_eq!(sink.buffers.len(), 1);
        assert_eq!(sink.stereo, 0);
        assert_eq!(pipeline.stats().failed, 1);
        assert!(pipeline.can_accept_read());
        Ok(())
    }
}
