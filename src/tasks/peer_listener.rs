//! Feeds peer bus traffic into the engine

use std::sync::Weak;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::{bus::BusMessage, engine::TimerEngine};

pub async fn peer_listener_task(engine: Weak<TimerEngine>, mut messages: broadcast::Receiver<BusMessage>) {
    loop {
        match messages.recv().await {
            Ok(message) => {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.apply_peer_message(message);
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Peer listener lagged behind, skipped {} messages", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Peer listener stopped");
}
