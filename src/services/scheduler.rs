//! Cooperative periodic scheduler
//!
//! One `PeriodicTask` per activity, all polled from the engine tick. A task
//! that fell behind fires once and re-arms from the poll time, so a stalled
//! loop never produces a burst of catch-up work.

use crate::infra::config::Config;
use smallvec::SmallVec;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Sample,
    Report,
    TimeSync,
    TimeSave,
}

#[derive(Debug, Clone)]
pub struct PeriodicTask {
    period: Duration,
    next_due: Instant,
}

impl PeriodicTask {
    /// Due at `start`
    pub fn immediate(period: Duration, start: Instant) -> Self {
        Self { period, next_due: start }
    }

    /// First due one period after `start`
    pub fn delayed(period: Duration, start: Instant) -> Self {
        Self { period, next_due: start + period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn next_due(&self) -> Instant {
        self.next_due
    }

    /// True (and re-armed) if due at `now`
    pub fn poll(&mut self, now: Instant) -> bool {
        if now < self.next_due {
            return false;
        }
        self.next_due += self.period;
        if self.next_due <= now {
            self.next_due = now + self.period;
        }
        true
    }
}

pub struct Scheduler {
    tasks: [(Activity, PeriodicTask); 4],
}

impl Scheduler {
    /// Sampling and time sync start at once; reports and checkpoints wait one period
    pub fn new(config: &Config, start: Instant) -> Self {
        Self {
            tasks: [
                (Activity::Sample, PeriodicTask::immediate(config.measurement_interval(), start)),
                (Activity::TimeSync, PeriodicTask::immediate(config.ntp_sync_interval(), start)),
                (Activity::Report, PeriodicTask::delayed(config.send_interval(), start)),
                (Activity::TimeSave, PeriodicTask::delayed(config.time_save_interval(), start)),
            ],
        }
    }

    /// Activities due at `now`, in a fixed order
    pub fn poll(&mut self, now: Instant) -> SmallVec<[Activity; 4]> {
        self.tasks
            .iter_mut()
            .filter_map(|(activity, task)| task.poll(now).then_some(*activity))
            .collect()
    }

    pub fn task(&self, activity: Activity) -> Option<&PeriodicTask> {
        self.tasks.iter().find(|(a, _)| *a == activity).map(|(_, t)| t)
    }
}
