//! Remote active-session record
//!
//! One row per user mirrors the timer across devices. The engine treats it as
//! advisory: every failure here is logged and local state carries on.

pub mod memory;
pub mod rest;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::TimerState;
pub use memory::InMemoryAuthority;
pub use rest::{RestAuthority, RestAuthorityConfig};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("remote returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("remote authority unavailable: {0}")]
    Unavailable(String),
}

/// Row shape of the remote active-session table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRemoteRecord {
    pub user_id: String,
    pub category_id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub accumulated_seconds: u64,
    pub is_running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration_seconds: Option<u64>,
    /// Explicit reconciliation clock; older rows may lack it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PendingRemoteRecord {
    pub fn from_state(user_id: &str, state: &TimerState) -> Self {
        Self {
            user_id: user_id.to_string(),
            category_id: state.category_id.clone(),
            start_time: state.started_at,
            paused_at: state.paused_at,
            accumulated_seconds: state.accumulated_seconds,
            is_running: state.is_running,
            total_duration_seconds: Some(state.total_duration_seconds),
            updated_at: Some(state.last_updated),
        }
    }

    /// When this replica was last written
    ///
    /// Rows without `updated_at` fall back to the later of the segment start
    /// and the pause instant.
    pub fn implied_last_updated(&self) -> Option<DateTime<Utc>> {
        self.updated_at
            .or_else(|| match (self.start_time, self.paused_at) {
                (Some(start), Some(paused)) => Some(start.max(paused)),
                (start, paused) => start.or(paused),
            })
    }

    /// Convert back into a timer state, normalizing rows that break the invariants
    pub fn into_state(self, fallback_total_seconds: u64) -> TimerState {
        let last_updated = self
            .implied_last_updated()
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let running = self.is_running && self.start_time.is_some();
        TimerState {
            is_running: running,
            started_at: if running { self.start_time } else { None },
            paused_at: if running { None } else { self.paused_at },
            accumulated_seconds: self.accumulated_seconds,
            category_id: self.category_id,
            total_duration_seconds: self
                .total_duration_seconds
                .filter(|total| *total > 0)
                .unwrap_or(fallback_total_seconds),
            last_updated,
        }
    }
}

/// Client for the remote system of record
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    async fn upsert(&self, record: &PendingRemoteRecord) -> Result<(), RemoteError>;
    async fn fetch(&self, user_id: &str) -> Result<Option<PendingRemoteRecord>, RemoteError>;
    async fn delete(&self, user_id: &str) -> Result<(), RemoteError>;

    /// Mirror a timer state; a zeroed idle state removes the row
    async fn sync_state(&self, user_id: &str, state: &TimerState) -> Result<(), RemoteError> {
        if state.holds_progress() {
            self.upsert(&PendingRemoteRecord::from_state(user_id, state)).await
        } else {
            self.delete(user_id).await
        }
    }
}
