//! Current-user handle supplied by the host application

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Who the engine syncs on behalf of; `None` means a guest without remote sync
#[derive(Debug, Clone)]
pub struct IdentityProvider {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl IdentityProvider {
    pub fn new(user_id: Option<String>) -> Self {
        let (tx, _) = watch::channel(user_id);
        Self { tx: Arc::new(tx) }
    }

    pub fn guest() -> Self {
        Self::new(None)
    }

    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self::new(Some(user_id.into()))
    }

    pub fn current_user(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Switch user; listeners are only woken when the value actually changes
    pub fn set_user(&self, user_id: Option<String>) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == user_id {
                return false;
            }
            *current = user_id.clone();
            true
        });
        if changed {
            info!(user = ?user_id, "Current user changed");
        }
    }

    /// Notifications for later user changes
    pub fn changes(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }
}

impl Default for IdentityProvider {
    fn default() -> Self {
        Self::guest()
    }
}
