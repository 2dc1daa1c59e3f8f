//! Delivery backends for the sync bus
//!
//! `ChannelHub` is a direct publish/subscribe primitive for engines living in
//! the same process. `StorageTransport` piggybacks on a shared key-value store
//! and observes writes made by other processes.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, Weak},
    time::Duration,
};

use tokio::{sync::broadcast, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, warn};

use super::{
    message::{BusMessage, CHANNEL_KEYS, LIVE_SLOT_KEY, PAUSED_SLOT_KEY},
    BusError,
};
use crate::store::KeyValueStore;

/// A way of moving [`BusMessage`]s between engine instances
pub trait BusTransport: Send + Sync {
    fn send(&self, message: &BusMessage) -> Result<(), BusError>;

    /// Stream of messages produced by any instance, including this one
    fn incoming(&self) -> broadcast::Receiver<BusMessage>;

    /// Messages that survived from before this transport was created
    fn retained(&self) -> Vec<BusMessage> {
        Vec::new()
    }

    fn name(&self) -> &'static str;
}

/// In-process fan-out shared by every bus created from a clone of it
#[derive(Debug, Clone)]
pub struct ChannelHub {
    tx: broadcast::Sender<BusMessage>,
}

impl ChannelHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl BusTransport for ChannelHub {
    fn send(&self, message: &BusMessage) -> Result<(), BusError> {
        // No receivers just means no peer is listening yet
        if self.tx.send(message.clone()).is_err() {
            debug!("Channel hub has no subscribers, message dropped");
        }
        Ok(())
    }

    fn incoming(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

/// Bus backend built on writes to a shared [`KeyValueStore`]
///
/// Every message is written under its slot key. A poller compares those keys
/// against the last value this transport saw and forwards anything new, so
/// writes made by this transport are never echoed back to it.
pub struct StorageTransport {
    kv: Arc<dyn KeyValueStore>,
    seen: Mutex<HashMap<&'static str, Option<String>>>,
    tx: broadcast::Sender<BusMessage>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl StorageTransport {
    /// Create the transport and, inside a tokio runtime, start polling
    pub fn new(kv: Arc<dyn KeyValueStore>, poll_interval: Duration) -> Arc<Self> {
        let (tx, _) = broadcast::channel(256);
        let seen = CHANNEL_KEYS
            .iter()
            .map(|key| (*key, kv.get(key).ok().flatten()))
            .collect();
        let transport = Arc::new(Self {
            kv,
            seen: Mutex::new(seen),
            tx,
            poller: Mutex::new(None),
        });

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let weak = Arc::downgrade(&transport);
                let task = handle.spawn(poll_task(weak, poll_interval));
                *transport.poller.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
            }
            Err(_) => debug!("No runtime available, storage transport will only poll on demand"),
        }
        transport
    }

    /// Check every channel key once and forward values written by others
    pub fn poll_changes(&self) -> usize {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let mut forwarded = 0;
        for key in CHANNEL_KEYS {
            let current = match self.kv.get(key) {
                Ok(value) => value,
                Err(e) => {
                    debug!("Storage transport could not read {}: {}", key, e);
                    continue;
                }
            };
            if seen.get(key) == Some(&current) {
                continue;
            }
            seen.insert(key, current.clone());

            let Some(raw) = current else { continue };
            match serde_json::from_str::<BusMessage>(&raw) {
                Ok(message) => {
                    let _ = self.tx.send(message);
                    forwarded += 1;
                }
                Err(e) => warn!("Ignoring unreadable bus entry under {}: {}", key, e),
            }
        }
        forwarded
    }
}

impl BusTransport for StorageTransport {
    fn send(&self, message: &BusMessage) -> Result<(), BusError> {
        let key = message.channel_key();
        let raw = serde_json::to_string(message)?;
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        self.kv.set(key, &raw)?;
        seen.insert(key, Some(raw));
        Ok(())
    }

    fn incoming(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }

    fn retained(&self) -> Vec<BusMessage> {
        [LIVE_SLOT_KEY, PAUSED_SLOT_KEY]
            .iter()
            .filter_map(|key| self.kv.get(key).ok().flatten())
            .filter_map(|raw| serde_json::from_str(&raw).ok())
            .collect()
    }

    fn name(&self) -> &'static str {
        "storage"
    }
}

impl Drop for StorageTransport {
    fn drop(&mut self) {
        if let Some(task) = self
            .poller
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

async fn poll_task(transport: Weak<StorageTransport>, poll_interval: Duration) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let Some(transport) = transport.upgrade() else {
            break;
        };
        transport.poll_changes();
    }
}
