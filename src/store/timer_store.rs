//! Timer state persistence with a one-generation backup

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{KeyValueStore, StoreError};
use crate::state::TimerState;

pub const TIMER_STATE_KEY: &str = "focus_timer_state_v1";
pub const TIMER_BACKUP_KEY: &str = "focus_timer_state_v1_backup";
const DAILY_TOTAL_PREFIX: &str = "focus_daily_total_v1";

/// Seconds spent on one category during one local day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DailyTotal {
    category_id: String,
    date: NaiveDate,
    total_seconds: u64,
}

/// Durable replica of the engine's timer state
#[derive(Clone)]
pub struct TimerStore {
    kv: Arc<dyn KeyValueStore>,
}

impl TimerStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Overwrite the primary slot, keeping the previous value as backup
    pub fn save(&self, state: &TimerState) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(state)?;
        if let Some(previous) = self.kv.get(TIMER_STATE_KEY)? {
            self.kv.set(TIMER_BACKUP_KEY, &previous)?;
        }
        self.kv.set(TIMER_STATE_KEY, &encoded)
    }

    /// Read the primary slot
    ///
    /// A value that no longer parses degrades to `None`, which callers treat
    /// as an idle timer.
    pub fn load(&self) -> Result<Option<TimerState>, StoreError> {
        let Some(raw) = self.kv.get(TIMER_STATE_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str::<TimerState>(&raw) {
            Ok(state) if state.check_invariants().is_ok() => Ok(Some(state)),
            Ok(state) => {
                warn!(category = %state.category_id, "Stored timer state violates invariants, ignoring it");
                Ok(None)
            }
            Err(e) => {
                warn!("Stored timer state is unreadable, ignoring it: {}", e);
                Ok(None)
            }
        }
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.kv.remove(TIMER_STATE_KEY)
    }

    /// Manual recovery path: read the previous generation
    ///
    /// Never called by the engine itself.
    pub fn recover_backup(&self) -> Result<Option<TimerState>, StoreError> {
        let Some(raw) = self.kv.get(TIMER_BACKUP_KEY)? else {
            return Ok(None);
        };
        let state = serde_json::from_str::<TimerState>(&raw)?;
        info!(category = %state.category_id, "Recovered timer state from backup slot");
        Ok(Some(state))
    }

    /// Add banked seconds to a category's total for `date`
    pub fn add_daily_seconds(&self, category_id: &str, date: NaiveDate, seconds: u64) -> Result<u64, StoreError> {
        let total = self.daily_total(category_id, date)?.saturating_add(seconds);
        let entry = DailyTotal {
            category_id: category_id.to_string(),
            date,
            total_seconds: total,
        };
        self.kv
            .set(&daily_key(category_id, date), &serde_json::to_string(&entry)?)?;
        Ok(total)
    }

    pub fn daily_total(&self, category_id: &str, date: NaiveDate) -> Result<u64, StoreError> {
        let total = self
            .kv
            .get(&daily_key(category_id, date))?
            .and_then(|raw| serde_json::from_str::<DailyTotal>(&raw).ok())
            .map_or(0, |entry| entry.total_seconds);
        Ok(total)
    }
}

fn daily_key(category_id: &str, date: NaiveDate) -> String {
    format!("{DAILY_TOTAL_PREFIX}_{category_id}_{date}")
}
