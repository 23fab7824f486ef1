//! Pomodoro break detection.
//!
//! Alerts are edge-triggered: one alert per newly crossed multiple of the
//! interval, however often the same elapsed value is observed.

use serde::{Deserialize, Serialize};

pub const DEFAULT_POMODORO_MINUTES: u32 = 25;

/// Raised once when elapsed time crosses a multiple of the interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroAlert {
    pub interval_minutes: u32,
    /// How many intervals have now been completed in this session
    pub count: u64,
    pub elapsed_seconds: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct PomodoroTracker {
    interval_minutes: u32,
    /// Number of crossings already alerted
    alerted: u64,
}

impl PomodoroTracker {
    pub(crate) fn new(interval_minutes: u32) -> Self {
        Self {
            interval_minutes: interval_minutes.max(1),
            alerted: 0,
        }
    }

    pub(crate) fn interval_minutes(&self) -> u32 {
        self.interval_minutes
    }

    pub(crate) fn alerted(&self) -> u64 {
        self.alerted
    }

    fn crossings_at(&self, elapsed_seconds: u64) -> u64 {
        (elapsed_seconds / 60) / u64::from(self.interval_minutes)
    }

    pub(crate) fn observe(&mut self, elapsed_seconds: u64) -> Option<PomodoroAlert> {
        let crossings = self.crossings_at(elapsed_seconds);
        if crossings <= self.alerted {
            return None;
        }
        // A jump over several multiples (e.g. after a reload) still alerts once
        self.alerted = crossings;
        Some(PomodoroAlert {
            interval_minutes: self.interval_minutes,
            count: crossings,
            elapsed_seconds,
        })
    }

    /// Change the interval without firing for crossings already behind us
    pub(crate) fn set_interval(&mut self, minutes: u32, elapsed_seconds: u64) {
        self.interval_minutes = minutes.max(1);
        self.alerted = self.crossings_at(elapsed_seconds);
    }

    pub(crate) fn restore(&mut self, alerted: u64, elapsed_seconds: u64) {
        self.alerted = alerted.min(self.crossings_at(elapsed_seconds));
    }

    pub(crate) fn reset(&mut self) {
        self.alerted = 0;
    }
}

/// Whole minutes until the next break, counted from the current whole minute.
/// At 0 min with a 25 min interval → 25; at 24 min → 1; at 25 min → 25.
pub fn next_break_in_minutes(elapsed_seconds: u64, interval_minutes: u32) -> u64 {
    let interval = u64::from(interval_minutes.max(1));
    let minutes = elapsed_seconds / 60;
    let next_break = (minutes + interval) / interval * interval;
    next_break - minutes
}
