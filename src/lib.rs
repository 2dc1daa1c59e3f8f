//! Focus Sync - a local-first focus timer with cross-process sync
//!
//! A [`TimerEngine`] owns the countdown state and keeps three replicas in step
//! with it: a durable local store, a broadcast bus shared with other engine
//! instances on the same machine, and an optional remote authority. The HTTP
//! API in [`api`] exposes the engine to local clients.

pub mod api;
pub mod bus;
pub mod clock;
pub mod config;
pub mod engine;
pub mod identity;
pub mod remote;
pub mod state;
pub mod store;
pub mod tasks;
pub mod utils;

// Re-export commonly used types
pub use api::create_router;
pub use bus::{BusMessage, ChannelHub, StorageTransport, SyncBus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use engine::{
    CommandError, EngineConfig, EngineDeps, LoggingHooks, ReconcileOutcome, SessionHooks,
    TickOutcome, TimerEngine, TimerStatus,
};
pub use identity::IdentityProvider;
pub use remote::{InMemoryAuthority, PendingRemoteRecord, RemoteAuthority, RestAuthority};
pub use state::{AppState, LiveSessionEvent, LiveSessionProjection, TimerPhase, TimerState};
pub use store::{FileKvStore, KeyValueStore, MemoryKvStore, TimerStore};
pub use utils::signals::shutdown_signal;
