use crate::engine::pomodoro::{PomodoroTracker, DEFAULT_POMODORO_MINUTES};
use crate::engine::{Clock, TimerEngine, TimerInner, TimerState};
use crate::error::Result;
use crate::models::{whole_seconds_between, PersistedTimerState};
use crate::Database;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Gaps above this are still honoured, but logged as a probable clock problem
const MAX_REASONABLE_GAP_SECS: u64 = 24 * 60 * 60;

impl TimerEngine {
    /// Engine on an explicit clock. Restores the persisted mirror; a failed
    /// restore is logged and the engine starts Idle.
    pub fn with_clock(db: Arc<Database>, clock: Arc<dyn Clock>, pomodoro_minutes: u32) -> Self {
        let pomodoro_minutes = if pomodoro_minutes == 0 {
            warn!(
                "[TIMER] Pomodoro interval of 0 min ignored, using {}",
                DEFAULT_POMODORO_MINUTES
            );
            DEFAULT_POMODORO_MINUTES
        } else {
            pomodoro_minutes
        };

        let engine = Self {
            inner: Mutex::new(TimerInner {
                state: TimerState::Idle,
                pomodoro: PomodoroTracker::new(pomodoro_minutes),
            }),
            db,
            clock,
        };

        // GUARD: never fail construction on a bad mirror
        if let Err(e) = engine.restore_state() {
            error!("[TIMER] Failed to restore state: {}", e);
        }
        engine
    }

    /// Write the mirror for `state`, or remove it when Idle
    pub(crate) fn persist(&self, state: &TimerState, pomodoro_alerts: u64) -> Result<()> {
        match state.to_persisted(self.clock.now(), pomodoro_alerts) {
            Some(mirror) => self.db.save_timer_state(&mirror),
            None => self.db.clear_timer_state(),
        }
    }

    /// The stored mirror when it no longer describes `current` (running or
    /// paused), i.e. another process paused, resumed, stopped or restarted
    /// the timer.
    pub(crate) fn external_state(
        &self,
        current: &TimerState,
        now: DateTime<Utc>,
    ) -> Result<Option<TimerState>> {
        let saved = self.db.load_timer_state()?;
        let unchanged = match (&saved, current) {
            (
                Some(mirror),
                TimerState::Running {
                    subject_id,
                    started_at,
                    segment_started_at,
                    ..
                },
            ) => {
                mirror.running
                    && mirror.active_subject_id.as_deref() == Some(subject_id.as_str())
                    && mirror.started_at == Some(*started_at)
                    && mirror.segment_started_at == Some(*segment_started_at)
            }
            (
                Some(mirror),
                TimerState::Paused {
                    subject_id,
                    started_at,
                    elapsed_seconds,
                },
            ) => {
                !mirror.running
                    && mirror.active_subject_id.as_deref() == Some(subject_id.as_str())
                    && mirror.started_at == Some(*started_at)
                    && mirror.elapsed_seconds == *elapsed_seconds
            }
            _ => false,
        };
        if unchanged {
            return Ok(None);
        }
        Ok(Some(
            saved
                .and_then(|mirror| state_from_mirror(&mirror, now))
                .unwrap_or(TimerState::Idle),
        ))
    }

    /// Replace an active in-memory state with the stored one when another
    /// process changed it. Returns whether anything was adopted.
    pub(crate) fn adopt_external(&self, inner: &mut TimerInner, now: DateTime<Utc>) -> Result<bool> {
        if matches!(inner.state, TimerState::Idle) {
            return Ok(false);
        }
        let external = match self.external_state(&inner.state, now)? {
            Some(external) => external,
            None => return Ok(false),
        };
        info!(
            "[TIMER] Timer changed by another process, now {}",
            external.name()
        );
        match &external {
            TimerState::Idle => inner.pomodoro.reset(),
            // crossings already behind us are not announced again
            other => inner.pomodoro.restore(u64::MAX, other.elapsed_at(now)),
        }
        inner.state = external;
        Ok(true)
    }

    /// Explicit save, e.g. before shutdown
    pub fn save_state(&self) -> Result<()> {
        let mut inner = self.lock_inner()?;
        if self.adopt_external(&mut inner, self.clock.now())? {
            return Ok(());
        }
        self.persist(&inner.state, inner.pomodoro.alerted())
    }

    fn restore_state(&self) -> Result<()> {
        let saved = match self.db.load_timer_state() {
            Ok(Some(saved)) => saved,
            Ok(None) => {
                info!("[RECOVERY] No saved timer state, starting idle");
                return Ok(());
            }
            Err(e) => {
                error!(
                    "[RECOVERY] Failed to load timer state: {}. Starting idle.",
                    e
                );
                return Ok(());
            }
        };

        let now = self.clock.now();
        let state = match state_from_mirror(&saved, now) {
            Some(state) => state,
            None => {
                warn!(
                    "[RECOVERY] Inconsistent timer mirror {:?}, discarding",
                    saved
                );
                self.db.clear_timer_state()?;
                return Ok(());
            }
        };

        let mut inner = self.lock_inner()?;
        let elapsed = state.elapsed_at(now);
        inner.pomodoro.restore(saved.pomodoro_alerts, elapsed);
        // Normalized mirror (segment fields, skew correction) so ticks compare equal
        if let Err(e) = self.persist(&state, inner.pomodoro.alerted()) {
            warn!("[RECOVERY] Failed to re-save restored state: {}", e);
        }
        info!(
            "[RECOVERY] Restored timer: state={}, elapsed={}s",
            state.name(),
            elapsed
        );
        inner.state = state;
        Ok(())
    }
}

/// Rebuild the in-memory state from the mirror.
///
/// Running: elapsed is recomputed from wall time, covering ticks missed while
/// the process was down. Paused: the persisted elapsed is trusted.
/// `None` means the mirror contradicts itself.
pub(crate) fn state_from_mirror(
    saved: &PersistedTimerState,
    now: DateTime<Utc>,
) -> Option<TimerState> {
    let subject_id = saved
        .active_subject_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());

    let subject_id = match subject_id {
        Some(id) => id.to_string(),
        None if !saved.running && saved.elapsed_seconds == 0 => return Some(TimerState::Idle),
        None => return None,
    };

    if !saved.running {
        let started_at = saved
            .started_at
            .unwrap_or_else(|| now - chrono::Duration::seconds(saved.elapsed_seconds as i64));
        return Some(TimerState::Paused {
            subject_id,
            started_at,
            elapsed_seconds: saved.elapsed_seconds,
        });
    }

    let started_at = saved.started_at?;
    // Mirrors without segment data predate pause-aware recovery: one segment from start
    let (segment_started_at, banked_seconds) = match saved.segment_started_at {
        Some(segment) => (segment, saved.banked_seconds),
        None => (started_at, 0),
    };

    if now < segment_started_at {
        warn!(
            "[RECOVERY] Clock skew detected: now ({}) < segment start ({}). Keeping last persisted elapsed {}s.",
            now, segment_started_at, saved.elapsed_seconds
        );
        return Some(TimerState::Running {
            subject_id,
            started_at,
            segment_started_at: now,
            banked_seconds: saved.elapsed_seconds,
        });
    }

    let gap = whole_seconds_between(segment_started_at, now);
    if gap > MAX_REASONABLE_GAP_SECS {
        warn!(
            "[RECOVERY] Timer has been running for {}s ({} hours) since last resume",
            gap,
            gap / 3600
        );
    }

    Some(TimerState::Running {
        subject_id,
        started_at,
        segment_started_at,
        banked_seconds,
    })
}
