//! Pure timer transitions
//!
//! Each function takes the current state and the instant of the command and
//! returns the next state. Nothing here performs I/O.

use chrono::{DateTime, Utc};

use super::CommandError;
use crate::{clock, state::TimerState};

/// Idle/Paused → Running
pub fn start(state: &TimerState, now: DateTime<Utc>) -> Result<TimerState, CommandError> {
    if state.is_running {
        return Err(CommandError::AlreadyRunning);
    }
    Ok(TimerState {
        is_running: true,
        started_at: Some(now),
        paused_at: None,
        last_updated: now,
        ..state.clone()
    })
}

/// Running → Paused; also returns the seconds banked by the closed segment
pub fn pause(state: &TimerState, now: DateTime<Utc>) -> Result<(TimerState, u64), CommandError> {
    let Some(started_at) = state.started_at.filter(|_| state.is_running) else {
        return Err(CommandError::NotRunning);
    };
    let segment = clock::seconds_between(started_at, now);
    let next = TimerState {
        is_running: false,
        started_at: None,
        paused_at: Some(now),
        accumulated_seconds: state.accumulated_seconds.saturating_add(segment),
        last_updated: now,
        ..state.clone()
    };
    Ok((next, segment))
}

/// Any → Idle, keeping the category and its duration
pub fn reset(state: &TimerState, now: DateTime<Utc>) -> TimerState {
    TimerState::idle(state.category_id.clone(), state.total_duration_seconds, now)
}

/// Completed → Idle
pub fn complete(state: &TimerState, now: DateTime<Utc>) -> TimerState {
    reset(state, now)
}

/// Seconds of the final running segment that count toward the session
pub fn final_segment(state: &TimerState, now: DateTime<Utc>) -> u64 {
    clock::elapsed_seconds(state, now)
        .min(state.total_duration_seconds)
        .saturating_sub(state.accumulated_seconds)
}

/// Any non-running state → Idle with a new category
pub fn change_category(
    state: &TimerState,
    category_id: &str,
    duration_seconds: u64,
    now: DateTime<Utc>,
) -> Result<TimerState, CommandError> {
    if duration_seconds == 0 {
        return Err(CommandError::InvalidDuration);
    }
    if state.is_running {
        return Err(CommandError::CategoryLocked);
    }
    Ok(TimerState::idle(category_id, duration_seconds, now))
}
