//! User commands and the tick

use std::sync::{atomic::Ordering, Arc, PoisonError};

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::{machine, CommandError, EngineInner, TickOutcome, TimerEngine};
use crate::{
    clock,
    remote::RemoteError,
    state::{LiveSessionEvent, TimerState},
    tasks,
};

impl TimerEngine {
    /// Idle/Paused → Running
    pub fn start(self: &Arc<Self>) -> Result<TimerState, CommandError> {
        let now = self.clock.now();
        let next = {
            let mut inner = self.lock_inner();
            let next = machine::start(&inner.state, now)?;
            self.commit(&mut inner, next.clone(), now);
            next
        };
        info!(category = %next.category_id, accumulated = next.accumulated_seconds, "Timer started");
        self.publish_projection(&next, now);
        self.ensure_ticking();
        self.push_remote(&next);
        Ok(next)
    }

    /// Running → Paused, banking the closed segment
    ///
    /// A session that already reached its target completes instead.
    pub fn pause(&self) -> Result<TimerState, CommandError> {
        let now = self.clock.now();
        let mut inner = self.lock_inner();
        if !inner.state.is_running {
            return Err(CommandError::NotRunning);
        }
        if inner.state.has_finished(now) {
            let finished = self.fold_completed(&mut inner, now);
            let idle = inner.state.clone();
            drop(inner);
            self.stop_ticking();
            self.finish_session(&finished, now);
            self.publish_projection(&idle, now);
            self.push_remote(&idle);
            return Ok(idle);
        }

        let segment = machine::final_segment(&inner.state, now);
        let (next, _) = machine::pause(&inner.state, now)?;
        self.commit(&mut inner, next.clone(), now);
        drop(inner);

        self.stop_ticking();
        self.record_daily(&next.category_id, segment, now);
        info!(category = %next.category_id, segment, accumulated = next.accumulated_seconds, "Timer paused");
        if next.accumulated_seconds > 0 {
            self.hooks
                .on_partial_session(&next.category_id, next.accumulated_seconds as f64 / 60.0);
        }
        self.publish_projection(&next, now);
        self.push_remote(&next);
        Ok(next)
    }

    /// Any → Idle; clears every replica
    pub fn reset(&self) -> TimerState {
        self.stop_ticking();
        let now = self.clock.now();
        let next = {
            let mut inner = self.lock_inner();
            let next = machine::reset(&inner.state, now);
            inner.state = next.clone();
            inner.owns_session = true;
            inner.settled = true;
            self.clear_persisted();
            self.bus.clear(Some(&next));
            next
        };
        info!(category = %next.category_id, "Timer reset");
        self.publish_projection(&next, now);
        self.push_remote(&next);
        next
    }

    /// Start when stopped, pause when running
    pub fn toggle(self: &Arc<Self>) -> Result<TimerState, CommandError> {
        if self.lock_inner().state.is_running {
            self.pause()
        } else {
            self.start()
        }
    }

    /// Switch category and target duration; discards any paused progress
    pub fn set_category(
        &self,
        category_id: &str,
        duration_seconds: u64,
    ) -> Result<TimerState, CommandError> {
        let now = self.clock.now();
        let next = {
            let mut inner = self.lock_inner();
            let next = machine::change_category(&inner.state, category_id, duration_seconds, now)?;
            inner.state = next.clone();
            inner.owns_session = true;
            inner.settled = true;
            self.persist(&next);
            self.bus.clear(Some(&next));
            next
        };
        info!(category = %category_id, duration_seconds, "Category changed");
        self.publish_projection(&next, now);
        self.push_remote(&next);
        Ok(next)
    }

    /// Advance the running session by one tick
    ///
    /// The owning engine folds a finished session back to idle under the state
    /// lock, so completion fires once no matter how many ticks observe it.
    /// Followers only refresh their projection until the leader goes quiet.
    pub fn tick(&self) -> TickOutcome {
        let now = self.clock.now();
        let mut inner = self.lock_inner();
        if !inner.state.is_running {
            return TickOutcome::Idle;
        }

        if !inner.owns_session {
            if !self.leader_silent(&inner, now) {
                let state = inner.state.clone();
                drop(inner);
                self.publish_projection(&state, now);
                return if state.has_finished(now) {
                    TickOutcome::AwaitingLeader
                } else {
                    TickOutcome::Running {
                        remaining_seconds: clock::remaining_seconds(&state, now),
                    }
                };
            }
            info!("Session leader went silent, taking over the running session");
            inner.owns_session = true;
        }

        if inner.state.has_finished(now) {
            let finished = self.fold_completed(&mut inner, now);
            let idle = inner.state.clone();
            drop(inner);
            self.finish_session(&finished, now);
            self.publish_projection(&idle, now);
            self.push_remote(&idle);
            return TickOutcome::Completed;
        }

        let state = inner.state.clone();
        self.bus
            .publish(Some(LiveSessionEvent::from_state(&state, now)), Some(&state));
        drop(inner);
        self.publish_projection(&state, now);
        TickOutcome::Running {
            remaining_seconds: clock::remaining_seconds(&state, now),
        }
    }

    /// Write a state to the remote authority for the current user
    pub async fn sync_remote(&self, state: &TimerState) -> Result<(), RemoteError> {
        let (Some(remote), Some(user)) = (&self.remote, self.identity.current_user()) else {
            return Ok(());
        };
        remote.sync_state(&user, state).await
    }

    /// Periodic upsert while this engine owns a live or paused session
    pub async fn flush_remote_if_active(&self) {
        let state = {
            let inner = self.lock_inner();
            if !inner.owns_session || !inner.state.holds_progress() {
                return;
            }
            inner.state.clone()
        };
        if let Err(e) = self.sync_remote(&state).await {
            warn!("Periodic remote sync failed: {}", e);
        }
    }

    /// Install a new owned state in every local replica; the caller holds the lock
    pub(super) fn commit(&self, inner: &mut EngineInner, next: TimerState, now: DateTime<Utc>) {
        inner.owns_session = true;
        inner.settled = true;
        self.persist(&next);
        self.broadcast(&next, now);
        inner.state = next;
    }

    /// Mirror a state onto the bus slots
    pub(super) fn broadcast(&self, state: &TimerState, now: DateTime<Utc>) {
        let event = LiveSessionEvent::from_state(state, now);
        if state.is_running {
            self.bus.publish(Some(event), Some(state));
        } else if state.holds_progress() {
            self.bus.pause(event, Some(state));
        } else {
            self.bus.clear(Some(state));
        }
    }

    /// Replace a finished session with idle and return it; the caller holds the lock
    pub(super) fn fold_completed(&self, inner: &mut EngineInner, now: DateTime<Utc>) -> TimerState {
        let idle = machine::complete(&inner.state, now);
        let finished = std::mem::replace(&mut inner.state, idle);
        inner.owns_session = true;
        inner.settled = true;
        self.clear_persisted();
        self.bus.clear(Some(&inner.state));
        finished
    }

    /// Bookkeeping for a session that reached its target
    pub(super) fn finish_session(&self, finished: &TimerState, now: DateTime<Utc>) {
        if finished.is_running {
            self.record_daily(&finished.category_id, machine::final_segment(finished, now), now);
        }
        let minutes = finished.total_duration_seconds / 60;
        let count = self.completed_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        info!(category = %finished.category_id, minutes, completed = count, "Session complete");
        self.hooks.on_session_complete(&finished.category_id, minutes);
    }

    /// Queue a state for the remote write-back task
    pub(super) fn push_remote(&self, state: &TimerState) {
        if self.remote.is_none() || self.identity.current_user().is_none() {
            return;
        }
        if !self.owns_session() {
            debug!("Skipping remote write, another instance owns the session");
            return;
        }
        self.remote_tx.send_replace(Some(state.clone()));
    }

    /// (Re)start the tick loop
    pub(super) fn ensure_ticking(self: &Arc<Self>) {
        let mut task = self.tick_task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = task.take() {
            previous.abort();
        }
        let Ok(handle) = Handle::try_current() else {
            debug!("No runtime available, ticks must be driven manually");
            return;
        };
        *task = Some(handle.spawn(tasks::tick_loop_task(
            Arc::downgrade(self),
            self.config.tick_interval,
        )));
    }

    pub(super) fn stop_ticking(&self) {
        if let Some(task) = self
            .tick_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }

    pub(super) fn leader_silent(&self, inner: &EngineInner, now: DateTime<Utc>) -> bool {
        inner.last_peer_update.map_or(true, |heard| {
            clock::seconds_between(heard, now) >= self.config.leader_timeout.as_secs()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::TimeZone;

    use super::*;
    use crate::{
        bus::{ChannelHub, SyncBus},
        clock::{Clock, ManualClock},
        engine::{EngineConfig, EngineDeps, SessionHooks},
        identity::IdentityProvider,
        state::TimerPhase,
        store::MemoryKvStore,
    };

    #[derive(Default)]
    struct Recorder {
        completed: Mutex<Vec<(String, u64)>>,
        partial: Mutex<Vec<f64>>,
    }

    impl SessionHooks for Recorder {
        fn on_session_complete(&self, category_id: &str, duration_minutes: u64) {
            self.completed
                .lock()
                .unwrap()
                .push((category_id.to_string(), duration_minutes));
        }

        fn on_partial_session(&self, _category_id: &str, elapsed_minutes: f64) {
            self.partial.lock().unwrap().push(elapsed_minutes);
        }
    }

    fn engine() -> (Arc<ManualClock>, Arc<Recorder>, Arc<TimerEngine>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()));
        let hooks = Arc::new(Recorder::default());
        let engine = TimerEngine::new(
            EngineConfig::default(),
            EngineDeps {
                clock: clock.clone(),
                store: Arc::new(MemoryKvStore::new()),
                bus: SyncBus::new(Arc::new(ChannelHub::default()), clock.clone()),
                remote: None,
                identity: IdentityProvider::guest(),
                hooks: hooks.clone(),
            },
        );
        (clock, hooks, engine)
    }

    #[test]
    fn pause_fires_partial_hook_and_banks_seconds() {
        let (clock, hooks, engine) = engine();
        engine.start().unwrap();
        clock.advance(90);
        let paused = engine.pause().unwrap();

        assert_eq!(paused.phase(), TimerPhase::Paused);
        assert_eq!(paused.accumulated_seconds, 90);
        assert_eq!(*hooks.partial.lock().unwrap(), vec![1.5]);
        assert_eq!(engine.daily_total("focus"), 90);
        assert_eq!(engine.pause(), Err(CommandError::NotRunning));
    }

    #[test]
    fn completion_fires_once_across_many_ticks() {
        let (clock, hooks, engine) = engine();
        engine.start().unwrap();
        clock.advance(1499);
        assert_eq!(engine.tick(), TickOutcome::Running { remaining_seconds: 1 });

        clock.advance(1);
        assert_eq!(engine.tick(), TickOutcome::Completed);
        for _ in 0..5 {
            clock.advance(1);
            assert_eq!(engine.tick(), TickOutcome::Idle);
        }
        assert_eq!(*hooks.completed.lock().unwrap(), vec![("focus".to_string(), 25)]);
        assert_eq!(engine.state().phase(), TimerPhase::Idle);
        assert_eq!(engine.daily_total("focus"), 1500);
    }

    #[test]
    fn fully_banked_running_state_completes_once() {
        let (clock, hooks, engine) = engine();
        {
            let mut inner = engine.lock_inner();
            inner.state = TimerState {
                is_running: true,
                started_at: Some(clock.now()),
                accumulated_seconds: 1500,
                ..inner.state.clone()
            };
            inner.owns_session = true;
        }
        let outcomes: Vec<_> = (0..3).map(|_| engine.tick()).collect();
        assert_eq!(
            outcomes,
            vec![TickOutcome::Completed, TickOutcome::Idle, TickOutcome::Idle]
        );
        assert_eq!(hooks.completed.lock().unwrap().len(), 1);
        // Nothing past the target is counted toward today's total
        assert_eq!(engine.daily_total("focus"), 0);
    }

    #[test]
    fn pausing_past_the_target_completes_instead() {
        let (clock, hooks, engine) = engine();
        engine.start().unwrap();
        clock.advance(2000);
        let state = engine.pause().unwrap();
        assert_eq!(state.phase(), TimerPhase::Idle);
        assert_eq!(hooks.completed.lock().unwrap().len(), 1);
        assert!(hooks.partial.lock().unwrap().is_empty());
    }

    #[test]
    fn toggle_and_category_lock() {
        let (_, _, engine) = engine();
        assert!(engine.toggle().unwrap().is_running);
        assert_eq!(
            engine.set_category("reading", 600),
            Err(CommandError::CategoryLocked)
        );
        assert!(!engine.toggle().unwrap().is_running);

        let changed = engine.set_category("reading", 600).unwrap();
        assert_eq!(changed.category_id, "reading");
        assert_eq!(engine.remaining_seconds(), 600);
    }

    #[test]
    fn follower_waits_for_leader_then_takes_over() {
        let (clock, hooks, engine) = engine();
        let now = clock.now();
        {
            let mut inner = engine.lock_inner();
            inner.state = machine::start(&inner.state, now).unwrap();
            inner.owns_session = false;
            inner.last_peer_update = Some(now);
        }

        clock.advance(1500);
        // Silence of 1500s exceeds the leader timeout, so this tick takes over
        assert_eq!(engine.tick(), TickOutcome::Completed);
        assert_eq!(hooks.completed.lock().unwrap().len(), 1);
    }

    #[test]
    fn follower_with_live_leader_does_not_complete() {
        let (clock, hooks, engine) = engine();
        let start = clock.now();
        clock.advance(1500);
        {
            let mut inner = engine.lock_inner();
            inner.state = machine::start(&inner.state, start).unwrap();
            inner.owns_session = false;
            inner.last_peer_update = Some(clock.now());
        }
        assert_eq!(engine.tick(), TickOutcome::AwaitingLeader);
        assert!(hooks.completed.lock().unwrap().is_empty());
    }
}
