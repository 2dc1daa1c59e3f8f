//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, TimeZone, Utc};
use focus_sync::{
    bus::{BusTransport, SyncBus},
    clock::ManualClock,
    engine::{EngineConfig, EngineDeps, SessionHooks, TimerEngine},
    identity::IdentityProvider,
    remote::{InMemoryAuthority, RemoteAuthority},
    state::TimerState,
    store::{MemoryKvStore, TimerStore},
};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    t0() + chrono::Duration::seconds(seconds)
}

/// Ticks are driven by hand and followers never time out on their own
pub fn test_config() -> EngineConfig {
    EngineConfig {
        tick_interval: Duration::from_secs(3600),
        remote_sync_interval: Duration::from_secs(3600),
        leader_timeout: Duration::from_secs(3600),
        ..EngineConfig::default()
    }
}

/// Hooks that remember every call
#[derive(Default)]
pub struct RecordingHooks {
    pub completed: Mutex<Vec<(String, u64)>>,
    pub partial: Mutex<Vec<(String, f64)>>,
}

impl RecordingHooks {
    pub fn completed_count(&self) -> usize {
        self.completed.lock().unwrap().len()
    }
}

impl SessionHooks for RecordingHooks {
    fn on_session_complete(&self, category_id: &str, duration_minutes: u64) {
        self.completed
            .lock()
            .unwrap()
            .push((category_id.to_string(), duration_minutes));
    }

    fn on_partial_session(&self, category_id: &str, elapsed_minutes: f64) {
        self.partial
            .lock()
            .unwrap()
            .push((category_id.to_string(), elapsed_minutes));
    }
}

pub struct TestEngine {
    pub engine: Arc<TimerEngine>,
    pub hooks: Arc<RecordingHooks>,
    pub identity: IdentityProvider,
    pub kv: MemoryKvStore,
}

impl TestEngine {
    pub fn store(&self) -> TimerStore {
        TimerStore::new(Arc::new(self.kv.clone()))
    }
}

pub struct EngineBuilder {
    pub clock: Arc<ManualClock>,
    pub kv: MemoryKvStore,
    pub transport: Arc<dyn BusTransport>,
    pub remote: Option<Arc<InMemoryAuthority>>,
    pub user: Option<String>,
    pub config: EngineConfig,
}

impl EngineBuilder {
    pub fn new(clock: Arc<ManualClock>, transport: Arc<dyn BusTransport>) -> Self {
        Self {
            clock,
            kv: MemoryKvStore::new(),
            transport,
            remote: None,
            user: None,
            config: test_config(),
        }
    }

    pub fn kv(mut self, kv: MemoryKvStore) -> Self {
        self.kv = kv;
        self
    }

    pub fn remote(mut self, remote: Arc<InMemoryAuthority>, user: Option<&str>) -> Self {
        self.remote = Some(remote);
        self.user = user.map(str::to_string);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> TestEngine {
        let hooks = Arc::new(RecordingHooks::default());
        let identity = IdentityProvider::new(self.user);
        let remote = self
            .remote
            .map(|remote| remote as Arc<dyn RemoteAuthority>);
        let engine = TimerEngine::new(
            self.config,
            EngineDeps {
                clock: self.clock.clone(),
                store: Arc::new(self.kv.clone()),
                bus: SyncBus::new(self.transport, self.clock),
                remote,
                identity: identity.clone(),
                hooks: hooks.clone(),
            },
        );
        TestEngine {
            engine,
            hooks,
            identity,
            kv: self.kv,
        }
    }
}

pub fn running_since(started_at: DateTime<Utc>, accumulated: u64) -> TimerState {
    TimerState {
        is_running: true,
        started_at: Some(started_at),
        accumulated_seconds: accumulated,
        ..TimerState::idle("focus", 1500, started_at)
    }
}

pub fn paused_at(paused_at: DateTime<Utc>, accumulated: u64) -> TimerState {
    TimerState {
        paused_at: Some(paused_at),
        accumulated_seconds: accumulated,
        ..TimerState::idle("focus", 1500, paused_at)
    }
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
