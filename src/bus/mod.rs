//! Cross-instance session broadcast
//!
//! The bus keeps two slots, the running session and the paused session, and
//! mirrors them between engine instances through a [`BusTransport`]. Slots
//! accept a message only when its timestamp is not older than what they
//! already hold, so arrival order never matters.

pub mod message;
pub mod transport;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clock::Clock,
    state::{LiveSessionEvent, TimerState},
    store::StoreError,
};
pub use message::{BusMessage, BusPayload, Slot};
pub use transport::{BusTransport, ChannelHub, StorageTransport};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus storage write failed: {0}")]
    Store(#[from] StoreError),

    #[error("failed to encode bus message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default)]
struct SlotValue {
    session: Option<LiveSessionEvent>,
    stamped_at: Option<DateTime<Utc>>,
}

impl SlotValue {
    fn accepts(&self, timestamp: DateTime<Utc>) -> bool {
        self.stamped_at.map_or(true, |current| timestamp >= current)
    }
}

#[derive(Debug, Default)]
struct Slots {
    live: SlotValue,
    paused: SlotValue,
}

impl Slots {
    fn get_mut(&mut self, slot: Slot) -> &mut SlotValue {
        match slot {
            Slot::Live => &mut self.live,
            Slot::Paused => &mut self.paused,
        }
    }
}

/// Process-wide sync bus handed to the engine by the composition root
pub struct SyncBus {
    origin: Uuid,
    transport: Arc<dyn BusTransport>,
    clock: Arc<dyn Clock>,
    slots: Mutex<Slots>,
    active_tx: watch::Sender<Option<LiveSessionEvent>>,
    peer_tx: broadcast::Sender<BusMessage>,
    listener: Mutex<Option<JoinHandle<()>>>,
    send_failing: AtomicBool,
}

impl SyncBus {
    /// Build a bus over `transport`, replaying whatever it retained
    pub fn new(transport: Arc<dyn BusTransport>, clock: Arc<dyn Clock>) -> Arc<Self> {
        let (active_tx, _) = watch::channel(None);
        let (peer_tx, _) = broadcast::channel(256);
        let bus = Arc::new(Self {
            origin: Uuid::new_v4(),
            transport,
            clock,
            slots: Mutex::new(Slots::default()),
            active_tx,
            peer_tx,
            listener: Mutex::new(None),
            send_failing: AtomicBool::new(false),
        });

        {
            let mut slots = bus.slots();
            for message in bus.transport.retained() {
                if let BusPayload::SessionUpdate { slot, session } = message.payload {
                    let value = slots.get_mut(slot);
                    if value.accepts(message.timestamp) {
                        *value = SlotValue {
                            session,
                            stamped_at: Some(message.timestamp),
                        };
                    }
                }
            }
        }
        bus.notify();
        info!(origin = %bus.origin, transport = bus.transport.name(), "Sync bus ready");
        bus
    }

    /// Build a bus and start applying incoming transport messages
    pub fn connect(transport: Arc<dyn BusTransport>, clock: Arc<dyn Clock>) -> Arc<Self> {
        let bus = Self::new(transport, clock);
        bus.listen();
        bus
    }

    /// Spawn the task that feeds transport messages into the slots
    ///
    /// Calling it again while the task is alive does nothing.
    pub fn listen(self: &Arc<Self>) {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available, sync bus will not receive peer messages");
            return;
        };
        let mut rx = self.transport.incoming();
        let weak = Arc::downgrade(self);
        *listener = Some(handle.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => match weak.upgrade() {
                        Some(bus) => bus.receive(message),
                        None => break,
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Sync bus lagged behind, skipped {} messages", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Sync bus listener stopped");
        }));
    }

    pub fn origin(&self) -> Uuid {
        self.origin
    }

    /// Listen to the active session; the current value is available immediately
    pub fn subscribe(&self) -> watch::Receiver<Option<LiveSessionEvent>> {
        self.active_tx.subscribe()
    }

    /// Peer messages accepted by this bus, for the engine to act upon
    pub fn peer_messages(&self) -> broadcast::Receiver<BusMessage> {
        self.peer_tx.subscribe()
    }

    /// Replace the running slot; a running session also empties the paused slot
    pub fn publish(&self, session: Option<LiveSessionEvent>, snapshot: Option<&TimerState>) {
        let now = self.clock.now();
        let clears_paused = session.as_ref().is_some_and(|s| s.is_running);
        {
            let mut slots = self.slots();
            slots.live = SlotValue {
                session: session.clone(),
                stamped_at: Some(now),
            };
            if clears_paused {
                slots.paused = SlotValue {
                    session: None,
                    stamped_at: Some(now),
                };
            }
        }
        self.notify();
        self.send(BusMessage::session_update(self.origin, now, Slot::Live, session, snapshot.cloned()));
        if clears_paused {
            self.send(BusMessage::session_update(self.origin, now, Slot::Paused, None, snapshot.cloned()));
        }
    }

    /// Same as [`SyncBus::publish`]
    pub fn update(&self, session: Option<LiveSessionEvent>, snapshot: Option<&TimerState>) {
        self.publish(session, snapshot);
    }

    /// Move a session from the running slot into the paused slot
    pub fn pause(&self, session: LiveSessionEvent, snapshot: Option<&TimerState>) {
        let now = self.clock.now();
        let paused = LiveSessionEvent {
            is_running: false,
            is_paused: true,
            timestamp: now,
            ..session
        };
        {
            let mut slots = self.slots();
            slots.live = SlotValue {
                session: None,
                stamped_at: Some(now),
            };
            slots.paused = SlotValue {
                session: Some(paused.clone()),
                stamped_at: Some(now),
            };
        }
        self.notify();
        self.send(BusMessage::session_update(self.origin, now, Slot::Live, None, snapshot.cloned()));
        self.send(BusMessage::session_update(self.origin, now, Slot::Paused, Some(paused), snapshot.cloned()));
    }

    /// Empty both slots everywhere
    pub fn clear(&self, snapshot: Option<&TimerState>) {
        let now = self.clock.now();
        {
            let mut slots = self.slots();
            for slot in [Slot::Live, Slot::Paused] {
                *slots.get_mut(slot) = SlotValue {
                    session: None,
                    stamped_at: Some(now),
                };
            }
        }
        self.notify();
        for slot in [Slot::Live, Slot::Paused] {
            self.send(BusMessage::session_update(self.origin, now, slot, None, snapshot.cloned()));
        }
    }

    pub fn clear_paused(&self) {
        let now = self.clock.now();
        self.slots().paused = SlotValue {
            session: None,
            stamped_at: Some(now),
        };
        self.notify();
        self.send(BusMessage::session_update(self.origin, now, Slot::Paused, None, None));
    }

    /// Ask peers to republish what they own
    pub fn request_state(&self) {
        self.send(BusMessage::state_request(self.origin, self.clock.now()));
    }

    /// Running slot, with elapsed time carried forward to `now`
    pub fn current_session(&self, now: DateTime<Utc>) -> Option<LiveSessionEvent> {
        self.slots()
            .live
            .session
            .as_ref()
            .map(|session| session.extrapolated(now))
    }

    /// Stamp of the running slot while it holds a running session
    pub fn live_heartbeat(&self) -> Option<DateTime<Utc>> {
        let slots = self.slots();
        slots
            .live
            .session
            .as_ref()
            .filter(|session| session.is_running)
            .and(slots.live.stamped_at)
    }

    /// Whether the last transport send failed
    pub fn is_send_failing(&self) -> bool {
        self.send_failing.load(Ordering::SeqCst)
    }

    pub fn paused_session(&self) -> Option<LiveSessionEvent> {
        self.slots().paused.session.clone()
    }

    /// Running slot if present, else the paused slot
    pub fn active_session(&self, now: DateTime<Utc>) -> Option<LiveSessionEvent> {
        self.current_session(now).or_else(|| self.paused_session())
    }

    /// Apply a message that arrived through the transport
    pub fn receive(&self, message: BusMessage) {
        if message.origin == self.origin {
            return;
        }
        match &message.payload {
            BusPayload::SessionUpdate { slot, session } => {
                let applied = {
                    let mut slots = self.slots();
                    let value = slots.get_mut(*slot);
                    if value.accepts(message.timestamp) {
                        *value = SlotValue {
                            session: session.clone(),
                            stamped_at: Some(message.timestamp),
                        };
                        true
                    } else {
                        false
                    }
                };
                if !applied {
                    debug!(?slot, from = %message.origin, "Dropping stale bus message");
                    return;
                }
                self.notify();
            }
            BusPayload::StateRequest => {
                debug!(from = %message.origin, "Peer requested current state");
            }
        }
        // Nobody listening for peer traffic is fine
        let _ = self.peer_tx.send(message);
    }

    /// Stop the transport listener
    pub fn close(&self) {
        if let Some(task) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }

    fn send(&self, message: BusMessage) {
        match self.transport.send(&message) {
            Ok(()) => {
                if self.send_failing.swap(false, Ordering::SeqCst) {
                    info!(transport = self.transport.name(), "Sync bus sends recovered");
                }
            }
            Err(e) if self.send_failing.swap(true, Ordering::SeqCst) => {
                debug!(transport = self.transport.name(), "Sync bus send still failing: {}", e);
            }
            Err(e) => {
                warn!(transport = self.transport.name(), "Failed to broadcast session update: {}", e);
            }
        }
    }

    fn notify(&self) {
        let active = self.active_session(self.clock.now());
        self.active_tx.send_replace(active);
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SyncBus {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, store::MemoryKvStore};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn session(elapsed: u64, running: bool, at: DateTime<Utc>) -> LiveSessionEvent {
        LiveSessionEvent {
            category_id: "focus".to_string(),
            elapsed_seconds: elapsed,
            is_running: running,
            is_paused: !running,
            timestamp: at,
        }
    }

    fn bus() -> (Arc<ManualClock>, Arc<SyncBus>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let bus = SyncBus::new(Arc::new(ChannelHub::default()), clock.clone());
        (clock, bus)
    }

    #[test]
    fn subscriber_sees_last_value_immediately() {
        let (_, bus) = bus();
        bus.publish(Some(session(10, true, t0())), None);

        let rx = bus.subscribe();
        assert_eq!(rx.borrow().as_ref().map(|s| s.elapsed_seconds), Some(10));
    }

    #[test]
    fn active_session_prefers_running_slot_and_extrapolates() {
        let (clock, bus) = bus();
        bus.pause(session(30, true, t0()), None);
        assert!(bus.current_session(t0()).is_none());
        assert!(bus.active_session(t0()).unwrap().is_paused);

        clock.advance(5);
        bus.publish(Some(session(30, true, clock.now())), None);
        assert!(bus.paused_session().is_none());

        let later = clock.now() + Duration::seconds(20);
        assert_eq!(bus.active_session(later).unwrap().elapsed_seconds, 50);
    }

    #[test]
    fn stale_message_does_not_revert_newer_slot() {
        let (clock, bus) = bus();
        let peer = Uuid::new_v4();
        clock.advance(100);
        bus.pause(session(40, true, clock.now()), None);

        // A running broadcast produced before the pause arrives late
        let stale = BusMessage::session_update(peer, t0() + Duration::seconds(50), Slot::Live, Some(session(20, true, t0())), None);
        bus.receive(stale);
        let late_clear = BusMessage::session_update(peer, t0() + Duration::seconds(60), Slot::Paused, None, None);
        bus.receive(late_clear);

        assert!(bus.current_session(clock.now()).is_none());
        assert_eq!(bus.paused_session().unwrap().elapsed_seconds, 40);
    }

    #[test]
    fn newer_peer_message_replaces_slot_and_is_forwarded() {
        let (clock, bus) = bus();
        let mut peers = bus.peer_messages();
        let message = BusMessage::session_update(Uuid::new_v4(), clock.now(), Slot::Live, Some(session(5, true, clock.now())), None);
        bus.receive(message.clone());

        assert_eq!(bus.current_session(clock.now()).unwrap().elapsed_seconds, 5);
        assert_eq!(peers.try_recv().unwrap(), message);
    }

    #[test]
    fn own_messages_are_ignored_on_receipt() {
        let (clock, bus) = bus();
        let mut peers = bus.peer_messages();
        let echo = BusMessage::session_update(bus.origin(), clock.now(), Slot::Live, Some(session(5, true, clock.now())), None);
        bus.receive(echo);
        assert!(bus.current_session(clock.now()).is_none());
        assert!(peers.try_recv().is_err());
    }

    #[test]
    fn clear_empties_both_slots() {
        let (clock, bus) = bus();
        bus.pause(session(30, true, t0()), None);
        clock.advance(1);
        bus.clear(None);
        assert!(bus.active_session(clock.now()).is_none());
        assert!(bus.subscribe().borrow().is_none());
    }

    #[test]
    fn failing_storage_keeps_local_slots_and_recovers() {
        let clock = Arc::new(ManualClock::new(t0()));
        let kv = MemoryKvStore::new();
        let bus = SyncBus::new(
            StorageTransport::new(Arc::new(kv.clone()), std::time::Duration::from_millis(10)),
            clock.clone(),
        );

        kv.set_unavailable(true);
        bus.publish(Some(session(10, true, t0())), None);
        clock.advance(1);
        bus.publish(Some(session(11, true, clock.now())), None);
        assert!(bus.is_send_failing());
        assert_eq!(bus.current_session(clock.now()).unwrap().elapsed_seconds, 11);

        kv.set_unavailable(false);
        bus.clear(None);
        assert!(!bus.is_send_failing());
    }

    #[test]
    fn heartbeat_tracks_running_slot_only() {
        let (clock, bus) = bus();
        assert!(bus.live_heartbeat().is_none());

        bus.publish(Some(session(1, true, t0())), None);
        assert_eq!(bus.live_heartbeat(), Some(t0()));

        clock.advance(3);
        bus.pause(session(4, true, clock.now()), None);
        assert!(bus.live_heartbeat().is_none());
    }

    #[tokio::test]
    async fn connected_buses_mirror_each_other() {
        let clock = Arc::new(ManualClock::new(t0()));
        let hub = ChannelHub::default();
        let a = SyncBus::connect(Arc::new(hub.clone()), clock.clone());
        let b = SyncBus::connect(Arc::new(hub), clock.clone());
        let mut b_rx = b.subscribe();

        a.publish(Some(session(12, true, t0())), None);
        tokio::time::timeout(std::time::Duration::from_secs(1), b_rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(b.active_session(t0()).unwrap().elapsed_seconds, 12);
    }
}
