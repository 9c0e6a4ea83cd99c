use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::task::JoinHandle;

use super::{Events, JobEvent};
use crate::timer::{Timer, TimerKind};

/// Generation counters of a job's timers.
///
/// Every start and stop bumps the counter of its kind. A fire carries the
/// generation it was started with and is dropped by the job task unless
/// that is still the current one, so a fire already queued when the timer
/// was stopped or restarted never reaches the job.
#[derive(Debug, Default)]
pub(crate) struct Generations([AtomicU64; 2]);

impl Generations {
    fn slot(&self, kind: TimerKind) -> &AtomicU64 {
        &self.0[index(kind)]
    }

    fn bump(&self, kind: TimerKind) -> u64 {
        self.slot(kind).fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn is_current(&self, kind: TimerKind, generation: u64) -> bool {
        self.slot(kind).load(Ordering::Acquire) == generation
    }
}

fn index(kind: TimerKind) -> usize {
    match kind {
        TimerKind::Http2Throttle => 0,
        TimerKind::StreamAttemptDelay => 1,
    }
}

/// One-shot timers on the tokio clock.
pub(crate) struct RtTimer<S> {
    events: Events<S>,
    generations: Arc<Generations>,
    running: [Option<JoinHandle<()>>; 2],
}

impl<S> RtTimer<S> {
    pub(crate) fn new(events: Events<S>, generations: Arc<Generations>) -> RtTimer<S> {
        RtTimer {
            events,
            generations,
            running: [None, None],
        }
    }

    fn cancel(&mut self, kind: TimerKind) {
        if let Some(task) = self.running[index(kind)].take() {
            task.abort();
        }
    }
}

impl<S: Send + 'static> Timer for RtTimer<S> {
    fn start(&mut self, kind: TimerKind, delay: Duration) {
        self.cancel(kind);
        let generation = self.generations.bump(kind);
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            events.send(JobEvent::TimerFired(kind, generation));
        });
        self.running[index(kind)] = Some(task);
    }

    fn stop(&mut self, kind: TimerKind) {
        self.generations.bump(kind);
        self.cancel(kind);
    }
}

impl<S> Drop for RtTimer<S> {
    fn drop(&mut self) {
        self.cancel(TimerKind::Http2Throttle);
        self.cancel(TimerKind::StreamAttemptDelay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_invalidates_the_running_generation() {
        let generations = Generations::default();
        let first = generations.bump(TimerKind::Http2Throttle);
        assert!(generations.is_current(TimerKind::Http2Throttle, first));

        generations.bump(TimerKind::Http2Throttle);
        assert!(!generations.is_current(TimerKind::Http2Throttle, first));
        assert!(generations.is_current(TimerKind::StreamAttemptDelay, 0));
    }
}
