//! Messages exchanged between engine instances

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::{LiveSessionEvent, TimerState};

/// Independent session slots kept by every bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Live,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusPayload {
    /// New value for one slot; `None` empties it
    SessionUpdate {
        slot: Slot,
        session: Option<LiveSessionEvent>,
    },
    /// A peer that just joined asks owners to republish
    StateRequest,
}

/// Envelope carried by every transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusMessage {
    pub origin: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Full state of the sender when the message was produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<TimerState>,
    pub payload: BusPayload,
}

impl BusMessage {
    pub fn session_update(
        origin: Uuid,
        timestamp: DateTime<Utc>,
        slot: Slot,
        session: Option<LiveSessionEvent>,
        snapshot: Option<TimerState>,
    ) -> Self {
        Self {
            origin,
            timestamp,
            snapshot,
            payload: BusPayload::SessionUpdate { slot, session },
        }
    }

    pub fn state_request(origin: Uuid, timestamp: DateTime<Utc>) -> Self {
        Self {
            origin,
            timestamp,
            snapshot: None,
            payload: BusPayload::StateRequest,
        }
    }

    /// Storage key the storage transport writes this message under
    pub fn channel_key(&self) -> &'static str {
        match self.payload {
            BusPayload::SessionUpdate { slot: Slot::Live, .. } => LIVE_SLOT_KEY,
            BusPayload::SessionUpdate { slot: Slot::Paused, .. } => PAUSED_SLOT_KEY,
            BusPayload::StateRequest => STATE_REQUEST_KEY,
        }
    }
}

pub const LIVE_SLOT_KEY: &str = "focus_bus_live_v1";
pub const PAUSED_SLOT_KEY: &str = "focus_bus_paused_v1";
pub const STATE_REQUEST_KEY: &str = "focus_bus_request_v1";

/// Every key the storage transport observes
pub const CHANNEL_KEYS: [&str; 3] = [LIVE_SLOT_KEY, PAUSED_SLOT_KEY, STATE_REQUEST_KEY];
