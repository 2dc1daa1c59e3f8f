//! Re-reconcile when the signed-in user changes

use std::sync::Weak;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::engine::TimerEngine;

pub async fn identity_watch_task(engine: Weak<TimerEngine>, mut users: watch::Receiver<Option<String>>) {
    while users.changed().await.is_ok() {
        let user = users.borrow_and_update().clone();
        let Some(engine) = engine.upgrade() else {
            break;
        };
        match user {
            Some(user) => {
                info!(user = %user, "User signed in, reconciling with remote");
                let outcome = engine.reconcile().await;
                debug!(?outcome, "Reconciled after sign-in");
            }
            None => info!("Signed out, remote sync paused"),
        }
    }
}
