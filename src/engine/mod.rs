//! Timer engine
//!
//! Owns the authoritative in-process [`TimerState`], applies commands, drives
//! the tick loop and keeps the local store, the sync bus and the remote row in
//! step with it. The store, the bus and the remote are replicas: failures there
//! are logged and never undo an in-memory transition.

mod commands;
pub mod machine;
pub mod reconcile;
mod sync;

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{watch, Mutex as AsyncMutex},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    bus::SyncBus,
    clock::{self, Clock},
    identity::IdentityProvider,
    remote::RemoteAuthority,
    state::{LiveSessionEvent, LiveSessionProjection, TimerPhase, TimerState},
    store::{KeyValueStore, StoreError, TimerStore},
};
pub use reconcile::ReplicaSource;

/// Rejected commands; the state is left untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("timer is already running")]
    AlreadyRunning,

    #[error("timer is not running")]
    NotRunning,

    #[error("category cannot change while the timer is running")]
    CategoryLocked,

    #[error("duration must be greater than zero")]
    InvalidDuration,
}

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub default_category_id: String,
    pub default_duration_seconds: u64,
    pub tick_interval: Duration,
    /// Period of the background remote upsert while a session is live
    pub remote_sync_interval: Duration,
    /// Silence after which a follower takes over a running session
    pub leader_timeout: Duration,
    /// Upper bound for the final remote write on shutdown
    pub shutdown_flush_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_category_id: "focus".to_string(),
            default_duration_seconds: 25 * 60,
            tick_interval: Duration::from_secs(1),
            remote_sync_interval: Duration::from_secs(30),
            leader_timeout: Duration::from_secs(5),
            shutdown_flush_timeout: Duration::from_secs(2),
        }
    }
}

/// Callbacks for consumers that record finished sessions
pub trait SessionHooks: Send + Sync {
    /// Fired exactly once per completed session
    fn on_session_complete(&self, category_id: &str, duration_minutes: u64);

    /// Fired on pause with the session's elapsed time so far
    fn on_partial_session(&self, _category_id: &str, _elapsed_minutes: f64) {}
}

/// Hooks that only log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHooks;

impl SessionHooks for LoggingHooks {
    fn on_session_complete(&self, category_id: &str, duration_minutes: u64) {
        info!(category = %category_id, duration_minutes, "Focus session complete");
    }

    fn on_partial_session(&self, category_id: &str, elapsed_minutes: f64) {
        info!(category = %category_id, elapsed_minutes, "Focus session paused");
    }
}

/// Collaborators injected by the composition root
pub struct EngineDeps {
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn KeyValueStore>,
    pub bus: Arc<SyncBus>,
    pub remote: Option<Arc<dyn RemoteAuthority>>,
    pub identity: IdentityProvider,
    pub hooks: Arc<dyn SessionHooks>,
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not running; the tick loop should stop
    Idle,
    Running { remaining_seconds: u64 },
    /// The session reached its target and was folded back to idle
    Completed,
    /// Target reached on a follower whose leader is still alive
    AwaitingLeader,
}

/// Result of a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Adopted {
        source: ReplicaSource,
        phase: TimerPhase,
    },
    /// The winning replica finished while nobody was ticking it
    CompletedWhileAway {
        category_id: String,
        duration_minutes: u64,
    },
}

/// Snapshot for UI binding and the HTTP status endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerStatus {
    pub phase: TimerPhase,
    pub state: TimerState,
    pub projection: LiveSessionProjection,
    pub remaining_seconds: u64,
    pub progress_percent: f64,
    pub owns_session: bool,
    pub memory_only: bool,
    pub completed_sessions: u64,
    pub today_seconds: u64,
}

struct EngineInner {
    state: TimerState,
    /// This instance drives completion, persistence and remote writes
    owns_session: bool,
    last_peer_update: Option<DateTime<Utc>>,
    /// The in-memory state supersedes whatever the local store holds
    settled: bool,
}

pub struct TimerEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    store: TimerStore,
    bus: Arc<SyncBus>,
    remote: Option<Arc<dyn RemoteAuthority>>,
    identity: IdentityProvider,
    hooks: Arc<dyn SessionHooks>,
    inner: Mutex<EngineInner>,
    projection_tx: watch::Sender<LiveSessionProjection>,
    /// Latest state waiting to be written to the remote authority
    remote_tx: watch::Sender<Option<TimerState>>,
    memory_only: AtomicBool,
    completed_sessions: AtomicU64,
    reconcile_gate: AsyncMutex<()>,
    tick_task: Mutex<Option<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl TimerEngine {
    /// Create an idle engine; call [`TimerEngine::initialize`] before use
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Arc<Self> {
        let now = deps.clock.now();
        // Never written by anyone, so every real replica is newer
        let state = TimerState::idle(
            config.default_category_id.clone(),
            config.default_duration_seconds,
            DateTime::<Utc>::from_timestamp(0, 0).unwrap_or(DateTime::<Utc>::MIN_UTC),
        );
        let (projection_tx, _) = watch::channel(LiveSessionProjection::from_state(&state, now));
        let (remote_tx, _) = watch::channel(None);
        Arc::new(Self {
            config,
            clock: deps.clock,
            store: TimerStore::new(deps.store),
            bus: deps.bus,
            remote: deps.remote,
            identity: deps.identity,
            hooks: deps.hooks,
            inner: Mutex::new(EngineInner {
                state,
                owns_session: false,
                last_peer_update: None,
                settled: false,
            }),
            projection_tx,
            remote_tx,
            memory_only: AtomicBool::new(false),
            completed_sessions: AtomicU64::new(0),
            reconcile_gate: AsyncMutex::new(()),
            tick_task: Mutex::new(None),
            background: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn bus(&self) -> &Arc<SyncBus> {
        &self.bus
    }

    pub fn identity(&self) -> &IdentityProvider {
        &self.identity
    }

    /// Copy of the authoritative state
    pub fn state(&self) -> TimerState {
        self.lock_inner().state.clone()
    }

    /// Live projection; the receiver holds the latest value immediately
    pub fn subscribe(&self) -> watch::Receiver<LiveSessionProjection> {
        self.projection_tx.subscribe()
    }

    pub fn projection(&self) -> LiveSessionProjection {
        LiveSessionProjection::from_state(&self.state(), self.clock.now())
    }

    /// Session currently on the bus, from this or any peer instance
    pub fn active_session(&self) -> Option<LiveSessionEvent> {
        self.bus.active_session(self.clock.now())
    }

    pub fn remaining_seconds(&self) -> u64 {
        clock::remaining_seconds(&self.state(), self.clock.now())
    }

    pub fn progress_percent(&self) -> f64 {
        clock::progress_percent(&self.state(), self.clock.now())
    }

    pub fn owns_session(&self) -> bool {
        self.lock_inner().owns_session
    }

    /// Whether persistence failed and the engine runs without the local store
    pub fn is_memory_only(&self) -> bool {
        self.memory_only.load(Ordering::SeqCst)
    }

    pub fn completed_sessions(&self) -> u64 {
        self.completed_sessions.load(Ordering::SeqCst)
    }

    /// Seconds banked today for a category
    pub fn daily_total(&self, category_id: &str) -> u64 {
        if self.is_memory_only() {
            return 0;
        }
        let today = self.clock.now().with_timezone(&Local).date_naive();
        self.store.daily_total(category_id, today).unwrap_or_else(|e| {
            warn!("Failed to read daily total: {}", e);
            0
        })
    }

    pub fn status(&self) -> TimerStatus {
        let now = self.clock.now();
        let (state, owns_session) = {
            let inner = self.lock_inner();
            (inner.state.clone(), inner.owns_session)
        };
        TimerStatus {
            phase: state.phase(),
            projection: LiveSessionProjection::from_state(&state, now),
            remaining_seconds: clock::remaining_seconds(&state, now),
            progress_percent: clock::progress_percent(&state, now),
            owns_session,
            memory_only: self.is_memory_only(),
            completed_sessions: self.completed_sessions(),
            today_seconds: self.daily_total(&state.category_id),
            state,
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_projection(&self, state: &TimerState, now: DateTime<Utc>) {
        self.projection_tx
            .send_replace(LiveSessionProjection::from_state(state, now));
    }

    fn persist(&self, state: &TimerState) {
        if self.is_memory_only() {
            return;
        }
        if let Err(e) = self.store.save(state) {
            self.degrade_persistence(&e);
        }
    }

    fn clear_persisted(&self) {
        if self.is_memory_only() {
            return;
        }
        if let Err(e) = self.store.clear() {
            self.degrade_persistence(&e);
        }
    }

    fn load_persisted(&self) -> Option<TimerState> {
        if self.is_memory_only() {
            return None;
        }
        self.store.load().unwrap_or_else(|e| {
            self.degrade_persistence(&e);
            None
        })
    }

    fn record_daily(&self, category_id: &str, seconds: u64, now: DateTime<Utc>) {
        if seconds == 0 || self.is_memory_only() {
            return;
        }
        let today = now.with_timezone(&Local).date_naive();
        if let Err(e) = self.store.add_daily_seconds(category_id, today, seconds) {
            self.degrade_persistence(&e);
        }
    }

    fn degrade_persistence(&self, error: &StoreError) {
        if !self.memory_only.swap(true, Ordering::SeqCst) {
            warn!("Local persistence failed, continuing in memory only: {}", error);
        }
    }

    fn track_background(&self, task: JoinHandle<()>) {
        self.background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }
}
