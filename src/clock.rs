//! Wall-clock access and elapsed-time arithmetic
//!
//! Everything here is pure except the clocks themselves. The calculator never
//! touches storage, the bus or the network.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::state::TimerState;

/// Source of the current wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for deterministic tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward (or backward, for negative values) by whole seconds
    pub fn advance(&self, seconds: i64) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += Duration::seconds(seconds);
    }

    /// Jump to an absolute instant
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whole seconds from `from` to `to`, clamped to zero when the clock went backwards
pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_seconds()).unwrap_or(0)
}

/// Banked seconds plus the current running segment
pub fn elapsed_seconds(state: &TimerState, now: DateTime<Utc>) -> u64 {
    let running = match (state.is_running, state.started_at) {
        (true, Some(started_at)) => seconds_between(started_at, now),
        _ => 0,
    };
    state.accumulated_seconds.saturating_add(running)
}

/// Seconds left until the session reaches its target duration
pub fn remaining_seconds(state: &TimerState, now: DateTime<Utc>) -> u64 {
    state
        .total_duration_seconds
        .saturating_sub(elapsed_seconds(state, now))
}

/// Completion percentage in `0.0..=100.0`
pub fn progress_percent(state: &TimerState, now: DateTime<Utc>) -> f64 {
    if state.total_duration_seconds == 0 {
        return 0.0;
    }
    let elapsed = elapsed_seconds(state, now).min(state.total_duration_seconds);
    elapsed as f64 / state.total_duration_seconds as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn running(accumulated: u64, started_at: DateTime<Utc>) -> TimerState {
        TimerState {
            is_running: true,
            started_at: Some(started_at),
            paused_at: None,
            accumulated_seconds: accumulated,
            category_id: "focus".to_string(),
            total_duration_seconds: 1500,
            last_updated: started_at,
        }
    }

    #[test]
    fn elapsed_adds_running_segment_to_banked_seconds() {
        let state = running(120, t0());
        assert_eq!(elapsed_seconds(&state, t0() + Duration::seconds(45)), 165);
        assert_eq!(remaining_seconds(&state, t0() + Duration::seconds(45)), 1335);
    }

    #[test]
    fn clock_going_backwards_clamps_the_segment() {
        let state = running(30, t0());
        assert_eq!(elapsed_seconds(&state, t0() - Duration::seconds(600)), 30);
    }

    #[test]
    fn stopped_state_ignores_now() {
        let state = TimerState::idle("focus", 1500, t0());
        assert_eq!(elapsed_seconds(&state, t0() + Duration::days(3)), 0);
        assert_eq!(remaining_seconds(&state, t0()), 1500);
    }

    #[test]
    fn remaining_never_underflows_and_progress_caps() {
        let state = running(1400, t0());
        let late = t0() + Duration::seconds(900);
        assert_eq!(remaining_seconds(&state, late), 0);
        assert!((progress_percent(&state, late) - 100.0).abs() < f64::EPSILON);
        assert!((progress_percent(&state, t0()) - 93.333_333).abs() < 0.001);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(t0());
        clock.advance(90);
        assert_eq!(clock.now(), t0() + Duration::seconds(90));
        clock.set(t0());
        assert_eq!(clock.now(), t0());
    }
}
