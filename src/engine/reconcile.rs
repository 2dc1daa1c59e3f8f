//! Replica selection

use serde::Serialize;

use crate::{remote::PendingRemoteRecord, state::TimerState};

/// Where the winning replica came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaSource {
    Local,
    Remote,
    Default,
}

/// Result of comparing the local and remote replicas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub state: Option<TimerState>,
    pub source: ReplicaSource,
}

/// Turn a remote row into a comparable replica
///
/// Rows without a stored duration borrow it from the local replica when both
/// describe the same category.
pub fn remote_replica(
    record: PendingRemoteRecord,
    local: Option<&TimerState>,
    default_duration_seconds: u64,
) -> TimerState {
    let fallback = local
        .filter(|state| state.category_id == record.category_id)
        .map_or(default_duration_seconds, |state| state.total_duration_seconds);
    record.into_state(fallback)
}

/// Last write wins by `last_updated`; ties go to the local replica
pub fn choose_winner(local: Option<TimerState>, remote: Option<TimerState>) -> Reconciled {
    match (local, remote) {
        (Some(local), Some(remote)) if remote.last_updated > local.last_updated => Reconciled {
            state: Some(remote),
            source: ReplicaSource::Remote,
        },
        (Some(local), _) => Reconciled {
            state: Some(local),
            source: ReplicaSource::Local,
        },
        (None, Some(remote)) => Reconciled {
            state: Some(remote),
            source: ReplicaSource::Remote,
        },
        (None, None) => Reconciled {
            state: None,
            source: ReplicaSource::Default,
        },
    }
}
