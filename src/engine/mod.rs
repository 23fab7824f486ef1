use crate::models::{whole_seconds_between, PersistedTimerState};
use crate::Database;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
mod clock;
mod core;
pub(crate) mod db;
pub mod pomodoro;
mod ticker;

pub use clock::{Clock, SystemClock};
pub use pomodoro::{next_break_in_minutes, PomodoroAlert, DEFAULT_POMODORO_MINUTES};
pub use ticker::{run_ticker, TickReport};

use pomodoro::PomodoroTracker;

/// Study timer - strict FSM.
/// Every transition runs under the single `inner` mutex, so the ticker never
/// observes a half-applied transition.
pub struct TimerEngine {
    pub(crate) inner: Mutex<TimerInner>,
    /// Durable store: receives finished sessions and the persisted mirror
    pub(crate) db: Arc<Database>,
    pub(crate) clock: Arc<dyn Clock>,
}

pub(crate) struct TimerInner {
    pub(crate) state: TimerState,
    pub(crate) pomodoro: PomodoroTracker,
}

/// Timer state. Running without a subject, or paused without an interval,
/// cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Running {
        subject_id: String,
        started_at: DateTime<Utc>,
        /// Start of the current run since start/resume
        segment_started_at: DateTime<Utc>,
        /// Elapsed seconds accumulated before this segment
        banked_seconds: u64,
    },
    Paused {
        subject_id: String,
        started_at: DateTime<Utc>,
        elapsed_seconds: u64,
    },
}

impl TimerState {
    pub fn name(&self) -> &'static str {
        match self {
            TimerState::Idle => "idle",
            TimerState::Running { .. } => "running",
            TimerState::Paused { .. } => "paused",
        }
    }

    /// Elapsed study seconds as of `now`
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> u64 {
        match self {
            TimerState::Idle => 0,
            TimerState::Running {
                segment_started_at,
                banked_seconds,
                ..
            } => banked_seconds.saturating_add(whole_seconds_between(*segment_started_at, now)),
            TimerState::Paused {
                elapsed_seconds, ..
            } => *elapsed_seconds,
        }
    }

    pub fn subject_id(&self) -> Option<&str> {
        match self {
            TimerState::Idle => None,
            TimerState::Running { subject_id, .. } | TimerState::Paused { subject_id, .. } => {
                Some(subject_id)
            }
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            TimerState::Idle => None,
            TimerState::Running { started_at, .. } | TimerState::Paused { started_at, .. } => {
                Some(*started_at)
            }
        }
    }

    /// Mirror to persist; `None` for Idle (the mirror is removed instead)
    pub(crate) fn to_persisted(
        &self,
        now: DateTime<Utc>,
        pomodoro_alerts: u64,
    ) -> Option<PersistedTimerState> {
        match self {
            TimerState::Idle => None,
            TimerState::Running {
                subject_id,
                started_at,
                segment_started_at,
                banked_seconds,
            } => Some(PersistedTimerState {
                running: true,
                elapsed_seconds: self.elapsed_at(now),
                active_subject_id: Some(subject_id.clone()),
                started_at: Some(*started_at),
                segment_started_at: Some(*segment_started_at),
                banked_seconds: *banked_seconds,
                pomodoro_alerts,
            }),
            TimerState::Paused {
                subject_id,
                started_at,
                elapsed_seconds,
            } => Some(PersistedTimerState {
                running: false,
                elapsed_seconds: *elapsed_seconds,
                active_subject_id: Some(subject_id.clone()),
                started_at: Some(*started_at),
                segment_started_at: None,
                banked_seconds: *elapsed_seconds,
                pomodoro_alerts,
            }),
        }
    }
}

/// View-facing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerStatus {
    Idle,
    Running,
    Paused,
}

/// Snapshot for views (status line, CLI output)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub status: TimerStatus,
    pub elapsed_seconds: u64,
    pub active_subject_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub pomodoro_interval_minutes: u32,
    /// Only while a session is active
    pub next_break_in_minutes: Option<u64>,
}

impl TimerSnapshot {
    pub fn is_running(&self) -> bool {
        self.status == TimerStatus::Running
    }
}

impl TimerEngine {
    /// Engine on the wall clock, restoring whatever mirror the store holds
    pub fn with_db(db: Arc<Database>, pomodoro_minutes: u32) -> Self {
        Self::with_clock(db, Arc::new(SystemClock), pomodoro_minutes)
    }
}
