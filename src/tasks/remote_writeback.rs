//! Remote write-back background task

use std::{sync::Weak, time::Duration};
use tokio::{
    sync::watch,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{engine::TimerEngine, state::TimerState};

/// Serialize writes to the remote authority
///
/// Queued states are written in order, keeping only the latest when several
/// arrive during one request. Every `period` an owned live or paused session
/// is upserted again so the remote row stays fresh.
pub async fn remote_writeback_task(
    engine: Weak<TimerEngine>,
    mut pending: watch::Receiver<Option<TimerState>>,
    period: Duration,
) {
    info!("Starting remote write-back task");

    let mut interval = interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            changed = pending.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(state) = pending.borrow_and_update().clone() else {
                    continue;
                };
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                match engine.sync_remote(&state).await {
                    Ok(()) => debug!(phase = ?state.phase(), "Remote session updated"),
                    Err(e) => warn!("Remote write failed, local state kept: {}", e),
                }
            }

            _ = interval.tick() => {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.flush_remote_if_active().await;
            }
        }
    }

    debug!("Remote write-back task stopped");
}
