//! Background tasks module
//!
//! Tasks hold a weak handle to the engine and stop once it is dropped.

pub mod identity_watch;
pub mod peer_listener;
pub mod remote_writeback;
pub mod tick_loop;

pub use identity_watch::identity_watch_task;
pub use peer_listener::peer_listener_task;
pub use remote_writeback::remote_writeback_task;
pub use tick_loop::tick_loop_task;
