//! In-memory remote authority

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex, PoisonError,
    },
};

use async_trait::async_trait;

use super::{PendingRemoteRecord, RemoteAuthority, RemoteError};

/// Keeps one row per user in memory
///
/// Stands in for the remote table in guest runs and tests. Writes are counted
/// so callers can check how often the engine talks to it.
#[derive(Debug, Default)]
pub struct InMemoryAuthority {
    rows: Mutex<HashMap<String, PendingRemoteRecord>>,
    unavailable: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the network were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Current row for a user, bypassing availability
    pub fn row(&self, user_id: &str) -> Option<PendingRemoteRecord> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned()
    }

    /// Seed a row directly
    pub fn insert(&self, record: PendingRemoteRecord) {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.user_id.clone(), record);
    }

    /// Number of upserts and deletes served so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), RemoteError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteAuthority for InMemoryAuthority {
    async fn upsert(&self, record: &PendingRemoteRecord) -> Result<(), RemoteError> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.insert(record.clone());
        Ok(())
    }

    async fn fetch(&self, user_id: &str) -> Result<Option<PendingRemoteRecord>, RemoteError> {
        self.check_available()?;
        Ok(self.row(user_id))
    }

    async fn delete(&self, user_id: &str) -> Result<(), RemoteError> {
        self.check_available()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(user_id);
        Ok(())
    }
}
