use crate::engine::pomodoro::{next_break_in_minutes, PomodoroAlert};
use crate::engine::{TimerEngine, TimerInner, TimerSnapshot, TimerState, TimerStatus};
use crate::error::{Result, StoreError};
use crate::models::Session;
use chrono::Duration;
use std::sync::MutexGuard;
use tracing::{debug, error, info, warn};

impl TimerEngine {
    pub(crate) fn lock_inner(&self) -> Result<MutexGuard<'_, TimerInner>> {
        Ok(self.inner.lock()?)
    }

    fn invalid(action: &'static str, state: &TimerState) -> StoreError {
        warn!(
            "[FSM] Invalid transition: cannot {} while {}",
            action,
            state.name()
        );
        StoreError::InvalidTransition {
            action,
            state: state.name(),
        }
    }

    /// Transition: Idle → Running.
    /// Starting while Running or Paused is refused so an in-progress interval
    /// is never reset.
    pub fn start(&self, subject_id: &str) -> Result<()> {
        let subject_id = subject_id.trim();
        if subject_id.is_empty() {
            return Err(StoreError::validation("Subject id must not be empty"));
        }

        let mut inner = self.lock_inner()?;
        if !matches!(inner.state, TimerState::Idle) {
            return Err(Self::invalid("start", &inner.state));
        }

        let now = self.clock.now();
        let next = TimerState::Running {
            subject_id: subject_id.to_string(),
            started_at: now,
            segment_started_at: now,
            banked_seconds: 0,
        };

        // Memory changes only after the mirror is safely written
        self.persist(&next, 0)?;
        inner.state = next;
        inner.pomodoro.reset();

        info!("[TIMER] Started for subject {}", subject_id);
        Ok(())
    }

    /// Transition: Running → Paused. Elapsed time is frozen.
    pub fn pause(&self) -> Result<()> {
        let mut inner = self.lock_inner()?;
        let now = self.clock.now();
        self.adopt_external(&mut inner, now)?;

        let next = match &inner.state {
            TimerState::Running {
                subject_id,
                started_at,
                ..
            } => TimerState::Paused {
                subject_id: subject_id.clone(),
                started_at: *started_at,
                elapsed_seconds: inner.state.elapsed_at(now),
            },
            other => return Err(Self::invalid("pause", other)),
        };

        self.persist(&next, inner.pomodoro.alerted()).map_err(|e| {
            error!("[TIMER] Failed to save state after pause: {}", e);
            e
        })?;
        info!("[TIMER] Paused at {}s", next.elapsed_at(now));
        inner.state = next;
        Ok(())
    }

    /// Transition: Paused → Running. Elapsed time carries over.
    pub fn resume(&self) -> Result<()> {
        let mut inner = self.lock_inner()?;
        let now = self.clock.now();
        self.adopt_external(&mut inner, now)?;

        let next = match &inner.state {
            TimerState::Paused {
                subject_id,
                started_at,
                elapsed_seconds,
            } => TimerState::Running {
                subject_id: subject_id.clone(),
                started_at: *started_at,
                segment_started_at: now,
                banked_seconds: *elapsed_seconds,
            },
            other => return Err(Self::invalid("resume", other)),
        };

        self.persist(&next, inner.pomodoro.alerted()).map_err(|e| {
            error!("[TIMER] Failed to save state after resume: {}", e);
            e
        })?;
        inner.state = next;
        info!("[TIMER] Resumed");
        Ok(())
    }

    /// Transition: Running | Paused → Idle.
    ///
    /// With elapsed time > 0 a session ending now is recorded; its start is
    /// `now - elapsed`, so paused time is not counted. The session write and
    /// the mirror removal share one transaction. If that fails the timer keeps
    /// its state and the error is returned, so nothing is lost.
    ///
    /// Stopping an idle timer is a no-op.
    pub fn stop(&self) -> Result<Option<Session>> {
        let mut inner = self.lock_inner()?;
        let now = self.clock.now();
        self.adopt_external(&mut inner, now)?;

        let (subject_id, elapsed) = match &inner.state {
            TimerState::Idle => {
                debug!("[TIMER] stop() while idle, nothing to do");
                return Ok(None);
            }
            state => (
                state.subject_id().unwrap_or_default().to_string(),
                state.elapsed_at(now),
            ),
        };

        let session = if elapsed > 0 {
            let start = now - Duration::seconds(elapsed as i64);
            let session = self
                .db
                .complete_timer_session(&subject_id, start, now)
                .map_err(|e| {
                    error!("[TIMER] Failed to record session on stop: {}", e);
                    e
                })?;
            Some(session)
        } else {
            self.db.clear_timer_state()?;
            None
        };

        inner.state = TimerState::Idle;
        inner.pomodoro.reset();
        info!("[TIMER] Stopped after {}s (subject {})", elapsed, subject_id);
        Ok(session)
    }

    /// One-second tick. While running: refresh elapsed time from the clock,
    /// persist the mirror and report a Pomodoro crossing at most once.
    /// A mirror rewritten by another process (paused, stopped) is adopted
    /// instead of being overwritten.
    pub fn tick(&self) -> Result<Option<PomodoroAlert>> {
        let mut inner = self.lock_inner()?;
        if !matches!(inner.state, TimerState::Running { .. }) {
            return Ok(None);
        }

        let now = self.clock.now();
        if self.adopt_external(&mut inner, now)? {
            return Ok(None);
        }

        let elapsed = inner.state.elapsed_at(now);
        let alert = inner.pomodoro.observe(elapsed);
        if let Some(alert) = &alert {
            info!(
                "[POMODORO] Break due: {} x {} min ({}s studied)",
                alert.count, alert.interval_minutes, alert.elapsed_seconds
            );
        }

        if let Err(e) = self.persist(&inner.state, inner.pomodoro.alerted()) {
            warn!("[TIMER] Failed to save state on tick: {}", e);
            return Err(e);
        }
        Ok(alert)
    }

    /// Change the Pomodoro interval (whole minutes, > 0)
    pub fn set_pomodoro_interval(&self, minutes: u32) -> Result<()> {
        if minutes == 0 {
            return Err(StoreError::validation(
                "Pomodoro interval must be at least one minute",
            ));
        }
        let mut inner = self.lock_inner()?;
        let elapsed = inner.state.elapsed_at(self.clock.now());
        inner.pomodoro.set_interval(minutes, elapsed);
        debug!("[POMODORO] Interval set to {} min", minutes);
        Ok(())
    }

    pub fn pomodoro_interval(&self) -> Result<u32> {
        Ok(self.lock_inner()?.pomodoro.interval_minutes())
    }

    /// Current state for views
    pub fn get_state(&self) -> Result<TimerSnapshot> {
        let inner = self.lock_inner()?;
        let now = self.clock.now();
        let elapsed = inner.state.elapsed_at(now);
        let interval = inner.pomodoro.interval_minutes();

        let status = match inner.state {
            TimerState::Idle => TimerStatus::Idle,
            TimerState::Running { .. } => TimerStatus::Running,
            TimerState::Paused { .. } => TimerStatus::Paused,
        };

        Ok(TimerSnapshot {
            status,
            elapsed_seconds: elapsed,
            active_subject_id: inner.state.subject_id().map(str::to_string),
            started_at: inner.state.started_at(),
            pomodoro_interval_minutes: interval,
            next_break_in_minutes: match status {
                TimerStatus::Idle => None,
                _ => Some(next_break_in_minutes(elapsed, interval)),
            },
        })
    }

    pub fn is_running(&self) -> Result<bool> {
        Ok(matches!(
            self.lock_inner()?.state,
            TimerState::Running { .. }
        ))
    }
}
