use std::time::{Duration, Instant};

mod matcher;
mod read;

pub use matcher::{MatchOutcome, MatchRequest, MatchScheduler};
pub use read::ReadScheduler;

/// The state of a job scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SchedulerState {
    /// No job is in flight.
    #[default]
    Idle,
    /// A job was started and the worker has not finished yet.
    Running,
    /// The worker finished and its result waits to be taken.
    ResultReady,
}

/// The side effect a transition asks the caller to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerAction {
    /// Start a job on the worker.
    Start,
    /// Fetch the result of the finished job.
    Collect,
    /// Forget the job in flight.
    Abandon,
}

/// What the scheduler sees of the device on a poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Observation {
    /// The device is connected.
    pub connected: bool,
    /// There is work to start.
    pub armed: bool,
    /// The worker reports a job in flight.
    pub worker_running: bool,
    /// The job in flight has exceeded the stall timeout.
    pub stalled: bool,
}

/// Compute the next scheduler state and the action it requires.
///
/// This is a pure function of the current state and the observation; the
/// caller performs the returned action against the device.
///
/// # Example
///
/// ```
/// use phase_stereo::scheduler::{transition, Observation, SchedulerAction, SchedulerState};
///
/// let obs = Observation { connected: true, armed: true, ..Default::default() };
/// assert_eq!(
///     transition(SchedulerState::Idle, &obs),
///     (SchedulerState::Running, Some(SchedulerAction::Start))
/// );
/// ```
pub fn transition(
    state: SchedulerState,
    obs: &Observation,
) -> (SchedulerState, Option<SchedulerAction>) {
    use SchedulerAction::*;
    use SchedulerState::*;

    match state {
        Idle if obs.connected && obs.armed && !obs.worker_running => (Running, Some(Start)),
        Idle => (Idle, None),
        Running if !obs.connected => (Idle, Some(Abandon)),
        Running if !obs.worker_running => (ResultReady, Some(Collect)),
        Running if obs.stalled => (Idle, Some(Abandon)),
        Running => (Running, None),
        ResultReady => (ResultReady, None),
    }
}

/// Counters kept by a scheduler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Jobs started.
    pub started: u64,
    /// Results collected from the worker.
    pub collected: u64,
    /// Jobs abandoned after a disconnect or a stall.
    pub abandoned: u64,
    /// Requests dropped because the scheduler was busy.
    pub dropped: u64,
}

/// The state machine shared by the read and match schedulers.
///
/// It only tracks state, timing and the collected result; the device calls
/// are made by the owning scheduler based on the returned action.
#[derive(Debug)]
pub struct JobScheduler<R> {
    name: &'static str,
    state: SchedulerState,
    started_at: Option<Instant>,
    stall_timeout: Duration,
    result: Option<R>,
    stats: SchedulerStats,
}

impl<R> JobScheduler<R> {
    /// Create an idle scheduler.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the job, used in log messages.
    /// * `stall_timeout` - How long a job may run before it is abandoned.
    pub fn new(name: &'static str, stall_timeout: Duration) -> Self {
        Self {
            name,
            state: SchedulerState::Idle,
            started_at: None,
            stall_timeout,
            result: None,
            stats: SchedulerStats::default(),
        }
    }

    /// The current state.
    #[inline]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// The scheduler counters.
    #[inline]
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Apply one transition for the given observation.
    ///
    /// The stall flag is derived from `now` and the start time of the job in
    /// flight.
    pub fn advance(
        &mut self,
        connected: bool,
        armed: bool,
        worker_running: bool,
        now: Instant,
    ) -> Option<SchedulerAction> {
        let stalled = self
            .started_at
            .is_some_and(|t| now.saturating_duration_since(t) >= self.stall_timeout);

        let obs = Observation {
            connected,
            armed,
            worker_running,
            stalled,
        };
        let (next, action) = transition(self.state, &obs);

        match action {
            Some(SchedulerAction::Start) => {
                self.started_at = Some(now);
                self.stats.started += 1;
                log::debug!("{} job started", self.name);
            }
            Some(SchedulerAction::Collect) => {
                self.started_at = None;
                self.stats.collected += 1;
            }
            Some(SchedulerAction::Abandon) => {
                self.started_at = None;
                self.stats.abandoned += 1;
                if connected {
                    log::warn!(
                        "{} job stalled for more than {:?}, abandoning it",
                        self.name,
                        self.stall_timeout
                    );
                } else {
                    log::warn!("{} job abandoned, device disconnected", self.name);
                }
            }
            None => {}
        }

        self.state = next;
        action
    }

    /// Store the result fetched after a [`SchedulerAction::Collect`].
    pub fn store(&mut self, result: R) {
        if self.state == SchedulerState::ResultReady {
            self.result = Some(result);
        }
    }

    /// Take the waiting result and return to [`SchedulerState::Idle`].
    ///
    /// Returns `None` and leaves the state untouched unless a result is ready.
    pub fn take_result(&mut self) -> Option<R> {
        if self.state != SchedulerState::ResultReady {
            return None;
        }
        self.state = SchedulerState::Idle;
        self.result.take()
    }

    /// Count a request that was refused.
    pub fn record_drop(&mut self) {
        self.stats.dropped += 1;
    }

    /// Drop any job or result and return to [`SchedulerState::Idle`].
    pub fn reset(&mut self) {
        self.state = SchedulerState::Idle;
        self.started_at = None;
        self.result = None;
    }
}
