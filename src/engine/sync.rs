//! Startup reconciliation and peer coordination

use std::sync::{Arc, PoisonError};

use tracing::{debug, info, warn};

use super::{reconcile, ReconcileOutcome, ReplicaSource, TimerEngine};
use crate::{
    bus::{BusMessage, BusPayload},
    clock,
    state::{TimerPhase, TimerState},
    tasks,
};

impl TimerEngine {
    /// Reconcile replicas, start the background tasks and ask peers for state
    pub async fn initialize(self: &Arc<Self>) -> ReconcileOutcome {
        self.bus.listen();
        // Subscribe before reconciling so nothing published meanwhile is missed
        let peer_messages = self.bus.peer_messages();
        let pending_writes = self.remote_tx.subscribe();

        let outcome = self.reconcile().await;

        let mut background = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        if background.is_empty() {
            let weak = Arc::downgrade(self);
            background.push(tokio::spawn(tasks::peer_listener_task(
                weak.clone(),
                peer_messages,
            )));
            if self.remote.is_some() {
                background.push(tokio::spawn(tasks::remote_writeback_task(
                    weak.clone(),
                    pending_writes,
                    self.config.remote_sync_interval,
                )));
                background.push(tokio::spawn(tasks::identity_watch_task(
                    weak,
                    self.identity.changes(),
                )));
            }
        }
        drop(background);

        self.bus.request_state();
        info!(?outcome, origin = %self.bus.origin(), "Timer engine initialized");
        outcome
    }

    /// Pick the newest of the local and remote replicas and adopt it
    ///
    /// Runs one pass at a time. A winner that already reached its target is
    /// completed here instead of being resumed.
    pub async fn reconcile(self: &Arc<Self>) -> ReconcileOutcome {
        let _gate = self.reconcile_gate.lock().await;
        let persisted = self.load_persisted();

        let remote_replica = match (&self.remote, self.identity.current_user()) {
            (Some(remote), Some(user)) => match remote.fetch(&user).await {
                Ok(record) => {
                    let local = self.local_replica(persisted.clone());
                    record.map(|record| {
                        reconcile::remote_replica(
                            record,
                            local.as_ref(),
                            self.config.default_duration_seconds,
                        )
                    })
                }
                Err(e) => {
                    warn!("Remote fetch failed, reconciling from local state only: {}", e);
                    None
                }
            },
            _ => None,
        };

        let now = self.clock.now();
        let mut inner = self.lock_inner();
        // A live leader drives completion; reconciling must not race it
        if inner.settled && !inner.owns_session && !self.leader_silent(&inner, now) {
            let state = inner.state.clone();
            drop(inner);
            debug!("Session is led by another instance, keeping the follower role");
            self.publish_projection(&state, now);
            return ReconcileOutcome::Adopted {
                source: ReplicaSource::Local,
                phase: state.phase(),
            };
        }
        let first_pass = !inner.settled;
        let local = if inner.settled {
            Some(inner.state.clone())
        } else {
            persisted
        };
        let decision = reconcile::choose_winner(local, remote_replica);
        inner.settled = true;

        let Some(winner) = decision.state else {
            let state = inner.state.clone();
            drop(inner);
            self.publish_projection(&state, now);
            debug!("No replica found, starting idle");
            return ReconcileOutcome::Adopted {
                source: ReplicaSource::Default,
                phase: state.phase(),
            };
        };

        // The store may hold a session another process on it is still ticking
        let peer_heartbeat = if first_pass
            && decision.source == ReplicaSource::Local
            && winner.is_running
        {
            self.bus.live_heartbeat().filter(|heard| {
                clock::seconds_between(*heard, now) < self.config.leader_timeout.as_secs()
            })
        } else {
            None
        };
        if let Some(heard) = peer_heartbeat {
            inner.state = winner.clone();
            inner.owns_session = false;
            inner.last_peer_update = Some(heard);
            drop(inner);
            info!(%heard, "Stored session is still led by another instance, following it");
            self.publish_projection(&winner, now);
            self.ensure_ticking();
            return ReconcileOutcome::Adopted {
                source: ReplicaSource::Local,
                phase: winner.phase(),
            };
        }

        if winner.has_finished(now) {
            inner.state = winner;
            let finished = self.fold_completed(&mut inner, now);
            let idle = inner.state.clone();
            drop(inner);
            self.stop_ticking();
            info!(
                source = ?decision.source,
                category = %finished.category_id,
                "Session finished while no instance was running it"
            );
            self.finish_session(&finished, now);
            self.publish_projection(&idle, now);
            self.push_remote(&idle);
            return ReconcileOutcome::CompletedWhileAway {
                category_id: finished.category_id.clone(),
                duration_minutes: finished.total_duration_seconds / 60,
            };
        }

        let changed = inner.state != winner;
        inner.state = winner.clone();
        inner.owns_session = true;
        if decision.source == ReplicaSource::Remote {
            self.persist(&winner);
        }
        // An idle winner must not wipe slots a running peer still owns
        if winner.holds_progress() {
            self.broadcast(&winner, now);
        }
        drop(inner);

        if changed {
            info!(source = ?decision.source, phase = ?winner.phase(), "Adopted reconciled timer state");
        }
        self.publish_projection(&winner, now);
        if winner.is_running {
            self.ensure_ticking();
        } else {
            self.stop_ticking();
        }
        if decision.source == ReplicaSource::Local && winner.holds_progress() {
            self.push_remote(&winner);
        }
        ReconcileOutcome::Adopted {
            source: decision.source,
            phase: winner.phase(),
        }
    }

    /// The host regained focus; re-run reconciliation against the remote
    pub async fn on_focus(self: &Arc<Self>) -> ReconcileOutcome {
        debug!("Focus regained, reconciling");
        self.reconcile().await
    }

    /// React to a message a peer engine put on the bus
    ///
    /// Strictly newer snapshots are adopted and make this engine a follower.
    /// When two owners hold the same snapshot the lower origin keeps it.
    pub fn apply_peer_message(self: &Arc<Self>, message: BusMessage) {
        let now = self.clock.now();
        if matches!(message.payload, BusPayload::StateRequest) {
            let inner = self.lock_inner();
            if inner.owns_session && inner.state.holds_progress() {
                debug!(peer = %message.origin, "Answering peer state request");
                self.broadcast(&inner.state, now);
            }
            return;
        }
        let Some(snapshot) = message.snapshot else {
            return;
        };

        let mut inner = self.lock_inner();
        if snapshot.last_updated < inner.state.last_updated {
            return;
        }
        if snapshot.last_updated == inner.state.last_updated {
            if !inner.owns_session {
                inner.last_peer_update = Some(now);
            } else if message.origin < self.bus.origin() && snapshot == inner.state {
                debug!(leader = %message.origin, "Yielding session ownership to peer");
                inner.owns_session = false;
                inner.last_peer_update = Some(now);
            }
            return;
        }

        inner.state = snapshot.clone();
        inner.owns_session = false;
        inner.last_peer_update = Some(now);
        inner.settled = true;
        if snapshot.holds_progress() {
            self.persist(&snapshot);
        } else {
            self.clear_persisted();
        }
        drop(inner);

        debug!(peer = %message.origin, phase = ?snapshot.phase(), "Adopted peer snapshot");
        self.publish_projection(&snapshot, now);
        if snapshot.phase() == TimerPhase::Running {
            self.ensure_ticking();
        } else {
            self.stop_ticking();
        }
    }

    /// Stop background work and flush the current state
    ///
    /// The final remote write is bounded by `shutdown_flush_timeout`.
    pub async fn shutdown(&self) {
        self.stop_ticking();
        for task in self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }

        let (state, owns_session) = {
            let inner = self.lock_inner();
            (inner.state.clone(), inner.owns_session)
        };
        if state.holds_progress() {
            self.persist(&state);
        }
        if owns_session && self.remote.is_some() {
            match tokio::time::timeout(self.config.shutdown_flush_timeout, self.sync_remote(&state)).await {
                Ok(Ok(())) => debug!("Final remote sync complete"),
                Ok(Err(e)) => warn!("Final remote sync failed: {}", e),
                Err(_) => warn!("Final remote sync timed out"),
            }
        }
        self.bus.close();
        info!("Timer engine stopped");
    }

    fn local_replica(&self, persisted: Option<TimerState>) -> Option<TimerState> {
        let inner = self.lock_inner();
        if inner.settled {
            Some(inner.state.clone())
        } else {
            persisted
        }
    }
}
