//! State management module
//!
//! Timer state, the views derived from it, and the HTTP server state.

pub mod app_state;
pub mod live_session;
pub mod timer_state;

pub use app_state::AppState;
pub use live_session::{LiveSessionEvent, LiveSessionProjection};
pub use timer_state::{TimerPhase, TimerState};
