use std::time::{Duration, Instant};

use crate::device::{FrameReadResult, StereoCamera};

use super::{JobScheduler, SchedulerAction, SchedulerState, SchedulerStats};

/// Polls a stereo camera for frame pairs.
///
/// Call [`ReadScheduler::poll`] on every cadence tick. A tick while a read is
/// in flight is a no-op, so reads are never queued. A finished read is held
/// in [`SchedulerState::ResultReady`] until taken, and no new read starts
/// until then.
#[derive(Debug)]
pub struct ReadScheduler {
    job: JobScheduler<FrameReadResult>,
}

impl ReadScheduler {
    /// Create an idle read scheduler.
    pub fn new(stall_timeout: Duration) -> Self {
        Self {
            job: JobScheduler::new("read", stall_timeout),
        }
    }

    /// Advance the scheduler by one tick against the camera.
    ///
    /// Starts a read, fetches a finished read or abandons a stalled one, and
    /// returns the action taken.
    pub fn poll<C: StereoCamera + ?Sized>(
        &mut self,
        camera: &mut C,
        now: Instant,
    ) -> Option<SchedulerAction> {
        if self.job.state() == SchedulerState::ResultReady {
            return None;
        }

        let connected = camera.is_connected();
        let worker_running = connected && camera.is_read_thread_running();

        let action = self.job.advance(connected, true, worker_running, now);
        match action {
            Some(SchedulerAction::Start) => camera.start_read_thread(),
            Some(SchedulerAction::Collect) => {
                let result = camera.read_thread_result();
                if !result.valid {
                    log::debug!("camera returned an invalid frame");
                }
                self.job.store(result);
            }
            _ => {}
        }
        action
    }

    /// Take the finished read, returning the scheduler to idle.
    pub fn take_result(&mut self) -> Option<FrameReadResult> {
        self.job.take_result()
    }

    /// Whether a finished read waits to be taken.
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

    /// Forget any read in flight or waiting.
    pub fn reset(&mut self) {
        self.job.reset();
    }
}
