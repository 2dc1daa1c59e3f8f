//! Durable local storage
//!
//! A small key-value layer that outlives the process, plus the timer-specific
//! store built on top of it.

pub mod backends;
pub mod timer_store;

use thiserror::Error;

pub use backends::{FileKvStore, MemoryKvStore};
pub use timer_store::TimerStore;

/// Errors raised by storage backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode stored value: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("storage quota exceeded ({limit} bytes)")]
    QuotaExceeded { limit: usize },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Minimal string key-value persistence shared by every engine on a device
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}
