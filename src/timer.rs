use std::time::Duration;

/// The one-shot timers a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Holds back extra attempts to a destination that speaks HTTP/2 while
    /// one attempt is in flight.
    Http2Throttle,
    /// Holds back TCP based attempts while the alternate protocol races them.
    StreamAttemptDelay,
}

/// Schedules the job's timers.
///
/// When a timer expires, its owner calls
/// [`Job::on_timer_fired`](crate::Job::on_timer_fired). Starting a timer that
/// is already running restarts it; a stopped timer must not fire.
pub trait Timer: Send {
    /// Starts `kind` to fire after `delay`.
    fn start(&mut self, kind: TimerKind, delay: Duration);

    /// Stops `kind` if it is running.
    fn stop(&mut self, kind: TimerKind);
}
