//! Tick loop background task

use std::{sync::Weak, time::Duration};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::engine::{TickOutcome, TimerEngine};

/// Drive `TimerEngine::tick` until the session stops running
pub async fn tick_loop_task(engine: Weak<TimerEngine>, period: Duration) {
    debug!("Starting tick loop");

    let mut interval = interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        let Some(engine) = engine.upgrade() else {
            break;
        };
        match engine.tick() {
            TickOutcome::Running { remaining_seconds } => {
                if remaining_seconds % 60 == 0 {
                    debug!("{} minutes remaining", remaining_seconds / 60);
                }
            }
            TickOutcome::AwaitingLeader => {
                debug!("Target reached, waiting for the session leader");
            }
            TickOutcome::Completed => {
                info!("Tick loop finished with a completed session");
                break;
            }
            TickOutcome::Idle => break,
        }
    }

    debug!("Tick loop stopped");
}
