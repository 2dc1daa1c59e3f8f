//! Live session views derived from a timer state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TimerState;
use crate::clock;

/// Read-only view of the current session handed to consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSessionProjection {
    pub category_id: String,
    pub elapsed_seconds: u64,
    pub elapsed_minutes: u64,
    pub is_running: bool,
    pub is_paused: bool,
}

impl LiveSessionProjection {
    pub fn from_state(state: &TimerState, now: DateTime<Utc>) -> Self {
        let elapsed = clock::elapsed_seconds(state, now);
        Self {
            category_id: state.category_id.clone(),
            elapsed_seconds: elapsed,
            elapsed_minutes: elapsed / 60,
            is_running: state.is_running,
            is_paused: !state.is_running && state.accumulated_seconds > 0,
        }
    }
}

/// Session shape exchanged between engine instances over the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSessionEvent {
    pub category_id: String,
    pub elapsed_seconds: u64,
    pub is_running: bool,
    pub is_paused: bool,
    /// Instant `elapsed_seconds` was measured at
    pub timestamp: DateTime<Utc>,
}

impl LiveSessionEvent {
    pub fn from_state(state: &TimerState, now: DateTime<Utc>) -> Self {
        let projection = LiveSessionProjection::from_state(state, now);
        Self {
            category_id: projection.category_id,
            elapsed_seconds: projection.elapsed_seconds,
            is_running: projection.is_running,
            is_paused: projection.is_paused,
            timestamp: now,
        }
    }

    /// Running sessions keep counting after they were published
    pub fn extrapolated(&self, now: DateTime<Utc>) -> Self {
        if !self.is_running {
            return self.clone();
        }
        Self {
            elapsed_seconds: self
                .elapsed_seconds
                .saturating_add(clock::seconds_between(self.timestamp, now)),
            ..self.clone()
        }
    }

    pub fn projection(&self) -> LiveSessionProjection {
        LiveSessionProjection {
            category_id: self.category_id.clone(),
            elapsed_seconds: self.elapsed_seconds,
            elapsed_minutes: self.elapsed_seconds / 60,
            is_running: self.is_running,
            is_paused: self.is_paused,
        }
    }
}
