use crate::engine::pomodoro::PomodoroAlert;
use crate::engine::{TimerEngine, TimerSnapshot};
use std::future::Future;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

/// What the ticker hands to its observer after each tick
#[derive(Debug, Clone)]
pub struct TickReport {
    pub snapshot: TimerSnapshot,
    pub alert: Option<PomodoroAlert>,
}

/// Drive `engine.tick()` once per second while the timer is running.
///
/// Returns when `shutdown` resolves or the timer leaves Running (paused or
/// stopped elsewhere). `on_tick` only sees ticks of a running timer.
pub async fn run_ticker<F, S>(engine: Arc<TimerEngine>, mut on_tick: F, shutdown: S)
where
    F: FnMut(TickReport),
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    // First tick on a wall-second boundary (12:00:00.000, not .500)
    if let Ok(now) = SystemTime::now().duration_since(UNIX_EPOCH) {
        let now_ms = now.as_millis();
        let delay_ms = ((now_ms / 1000 + 1) * 1000 - now_ms).min(999);
        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(Duration::from_millis(delay_ms as u64)) => {}
        }
    }

    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // interval fires immediately once; that instant is the boundary we just waited for
    interval.tick().await;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("[TIMER] Ticker shutting down");
                if let Err(e) = engine.save_state() {
                    warn!("[TIMER] Failed to save state on ticker shutdown: {}", e);
                }
                break;
            }
            _ = interval.tick() => {
                let alert = match engine.tick() {
                    Ok(alert) => alert,
                    Err(e) => {
                        warn!("[TIMER] Tick failed: {}", e);
                        None
                    }
                };
                match engine.get_state() {
                    Ok(snapshot) if snapshot.is_running() => on_tick(TickReport { snapshot, alert }),
                    Ok(snapshot) => {
                        info!("[TIMER] Ticker stopping, timer is {:?}", snapshot.status);
                        break;
                    }
                    Err(e) => debug!("[TIMER] Could not read state after tick: {}", e),
                }
            }
        }
    }
}
