//! Timer state structure and invariants

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock;

/// The single unit of truth for one countdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub is_running: bool,
    /// Start of the current running segment; set iff `is_running`
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    /// Seconds banked from all previous running segments
    pub accumulated_seconds: u64,
    pub category_id: String,
    pub total_duration_seconds: u64,
    /// When this snapshot was produced; the reconciliation clock
    pub last_updated: DateTime<Utc>,
}

/// Phase derived from a [`TimerState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerPhase {
    Idle,
    Running,
    Paused,
}

impl TimerState {
    /// Create a zeroed state for a category
    pub fn idle(category_id: impl Into<String>, total_duration_seconds: u64, now: DateTime<Utc>) -> Self {
        Self {
            is_running: false,
            started_at: None,
            paused_at: None,
            accumulated_seconds: 0,
            category_id: category_id.into(),
            total_duration_seconds,
            last_updated: now,
        }
    }

    pub fn phase(&self) -> TimerPhase {
        if self.is_running {
            TimerPhase::Running
        } else if self.accumulated_seconds > 0 {
            TimerPhase::Paused
        } else {
            TimerPhase::Idle
        }
    }

    /// Whether the state carries anything worth replicating
    pub fn holds_progress(&self) -> bool {
        self.is_running || self.accumulated_seconds > 0
    }

    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        clock::elapsed_seconds(self, now)
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        clock::remaining_seconds(self, now)
    }

    /// A live session that has already reached its target duration
    pub fn has_finished(&self, now: DateTime<Utc>) -> bool {
        self.holds_progress() && self.elapsed_seconds(now) >= self.total_duration_seconds
    }

    /// Check the running/stopped invariants
    ///
    /// Transitions uphold these by construction; this exists so tests can
    /// assert them over every reachable state.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.is_running {
            if self.started_at.is_none() {
                return Err("running state without started_at".to_string());
            }
            if self.paused_at.is_some() {
                return Err("running state with paused_at".to_string());
            }
        } else if self.started_at.is_some() {
            return Err("stopped state with started_at".to_string());
        }
        if self.total_duration_seconds == 0 {
            return Err("zero target duration".to_string());
        }
        Ok(())
    }
}
