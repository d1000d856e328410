use std::time::{Duration, Instant};

use phase_image::{Image, ImageSize};

use crate::device::{MatchComputeResult, StereoImagePair, StereoMatcher};

use super::{JobScheduler, SchedulerAction, SchedulerState, SchedulerStats};

/// A rectified pair ready for matching, with the color frame it belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchRequest {
    /// The rectified pair in device order.
    pub pair: StereoImagePair,
    /// The RGBA color frame in display order, aligned with the disparity.
    pub color: Image<u8, 4>,
}

/// A finished match with the color frame of its request.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchOutcome {
    /// The raw matcher output.
    pub result: MatchComputeResult,
    /// The color frame of the request.
    pub color: Image<u8, 4>,
    /// The size of the matched pair.
    pub size: ImageSize,
}

/// Feeds rectified pairs into a stereo matcher.
///
/// The scheduler is armed with a [`MatchRequest`] after each processed read
/// and consumes it exactly once. Arming while a match is in flight or waiting
/// is refused, so matching lags capture by at most one job.
#[derive(Debug)]
pub struct MatchScheduler {
    job: JobScheduler<MatchOutcome>,
    pending: Option<MatchRequest>,
    in_flight: Option<(Image<u8, 4>, ImageSize)>,
}

impl MatchScheduler {
    /// Create an idle, unarmed match scheduler.
    pub fn new(stall_timeout: Duration) -> Self {
        Self {
            job: JobScheduler::new("match", stall_timeout),
            pending: None,
            in_flight: None,
        }
    }

    /// Arm the scheduler with a request.
    ///
    /// Returns false if the request was dropped because a match is in flight
    /// or waiting. Arming twice while idle keeps only the newest request.
    pub fn arm(&mut self, request: MatchRequest) -> bool {
        if self.job.state() != SchedulerState::Idle {
            log::debug!("matcher busy, dropping match request");
            self.job.record_drop();
            return false;
        }
        if self.pending.replace(request).is_some() {
            self.job.record_drop();
        }
        true
    }

    /// Whether a request waits to be started.
    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Advance the scheduler by one tick against the matcher.
    pub fn poll<M: StereoMatcher + ?Sized>(
        &mut self,
        matcher: &mut M,
        now: Instant,
    ) -> Option<SchedulerAction> {
        if self.job.state() == SchedulerState::ResultReady {
            return None;
        }

        let worker_running = matcher.is_compute_thread_running();
        let action = self
            .job
            .advance(true, self.pending.is_some(), worker_running, now);

        match action {
            Some(SchedulerAction::Start) => {
                if let Some(request) = self.pending.take() {
                    self.in_flight = Some((request.color, request.pair.size()));
                    matcher.start_compute_thread(request.pair);
                }
            }
            Some(SchedulerAction::Collect) => {
                if let Some((color, size)) = self.in_flight.take() {
                    let result = matcher.compute_thread_result(size);
                    if !result.valid {
                        log::debug!("matcher returned an invalid disparity");
                    }
                    self.job.store(MatchOutcome {
                        result,
                        color,
                        size,
                    });
                }
            }
            Some(SchedulerAction::Abandon) => self.in_flight = None,
            None => {}
        }
        action
    }

    /// Take the finished match, returning the scheduler to idle.
    pub fn take_result(&mut self) -> Option<MatchOutcome> {
        self.job.take_result()
    }

    /// Whether a finished match waits to be taken.
    pub fn has_result(&self) -> bool {
        self.job.state() == SchedulerState::ResultReady
    }

    /// The current state.
    pub fn state(&self) -> SchedulerState {
        self.job.state()
    }

    /// The scheduler counters.
    pub fn stats(&self) -> SchedulerStats {
        self.job.stats()
    }

    /// Forget any request, match in flight or result.
    pub fn reset(&mut self) {
        self.job.reset();
        self.pending = None;
        self.in_flight = None;
    }
}
