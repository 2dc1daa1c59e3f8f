//! API response structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    engine::{ReconcileOutcome, TimerStatus},
    state::{LiveSessionEvent, TimerPhase},
};

/// API response structure for timer commands
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse {
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub timer: TimerStatus,
}

impl ApiResponse {
    pub fn new(status: String, message: String, timer: TimerStatus) -> Self {
        Self {
            status,
            message,
            timestamp: Utc::now(),
            timer,
        }
    }

    /// Response whose status mirrors the timer phase
    pub fn from_timer(message: String, timer: TimerStatus) -> Self {
        let status = match timer.phase {
            TimerPhase::Idle => "idle",
            TimerPhase::Running => "running",
            TimerPhase::Paused => "paused",
        };
        Self::new(status.to_string(), message, timer)
    }

    pub fn error(message: String, timer: TimerStatus) -> Self {
        Self::new("error".to_string(), message, timer)
    }
}

/// Body of POST /timer/category
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRequest {
    pub category_id: String,
    pub duration_seconds: u64,
}

/// Result of POST /timer/focus
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileResponse {
    pub outcome: ReconcileOutcome,
    pub timer: TimerStatus,
}

/// Server status including the shared bus view
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub timer: TimerStatus,
    pub active_session: Option<LiveSessionEvent>,
    pub origin: String,
    pub uptime: String,
    pub port: u16,
    pub host: String,
    pub last_action: Option<String>,
    pub last_action_time: Option<DateTime<Utc>>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
