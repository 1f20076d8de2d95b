//! Phase engine
//!
//! Drives each room through its cycle. Every transition is guarded twice:
//! the dedup window rejects a repeat of the same (phase, deadline)
//! resolution, and break ends additionally claim the room's instance
//! registration so that two drivers racing on the same break cannot both
//! apply it.
//!
//! A failed transition is rolled back in the cache and its dedup entry
//! forgotten, so the next tick retries from the same state.

use std::sync::{Arc, Weak};

use futures_util::FutureExt;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::cache::patch;
use crate::clock::{Timestamp, duration_ms, format_timestamp};
use crate::config::schema::PhaseConfig;
use crate::coord::TimerCallback;
use crate::engine::RoomServices;
use crate::error::{CacheError, PhaseError};
use crate::observability::events::{Event, event_time};
use crate::observability::metrics::record_phase_transition;
use crate::store::RoomId;

use super::policy::{BreakPolicy, EveryNth};
use super::state::{
    BreakRecord, FIELD_BREAK, FIELD_CYCLE_COUNT, FIELD_DEADLINE, FIELD_PHASE, Phase, RoomSession,
};

/// Timer that calls [`PhaseEngine::process`] for the room's whole lifetime.
pub const DRIVER_TIMER: &str = "driver:tick";
/// Timer that polls for the end of the running break.
pub const BREAK_POLL_TIMER: &str = "break:poll";
/// Prefix shared by every break-scoped timer.
pub const BREAK_TIMER_PREFIX: &str = "break:";

/// Dedup category for phase transitions.
pub const CATEGORY_TRANSITION: &str = "transition";
/// Dedup category for break announcements.
pub const CATEGORY_BREAK: &str = "break";

/// Result of one [`PhaseEngine::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The current phase has not reached its deadline.
    Idle,
    /// The room had no session; a fresh ACTIVE one was written.
    Activated,
    /// ACTIVE ended and a break of this kind began.
    BreakStarted(Phase),
    /// The break ended; the room is ACTIVE again.
    BreakEnded,
    /// Another attempt already performed (or is performing) this transition.
    Duplicate,
}

// ============================================================================
// PhaseEngine
// ============================================================================

/// Per-room phase state machine.
pub struct PhaseEngine {
    config: PhaseConfig,
    services: RoomServices,
    policy: Box<dyn BreakPolicy>,
    me: Weak<Self>,
}

impl PhaseEngine {
    /// Creates an engine using the every-Nth break policy from `config`.
    #[must_use]
    pub fn new(config: PhaseConfig, services: RoomServices) -> Arc<Self> {
        let policy = EveryNth::new(config.long_break_every);
        Self::with_policy(config, services, Box::new(policy))
    }

    /// Creates an engine with a custom break policy.
    #[must_use]
    pub fn with_policy(
        config: PhaseConfig,
        services: RoomServices,
        policy: Box<dyn BreakPolicy>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            config,
            services,
            policy,
            me: me.clone(),
        })
    }

    /// Phase timing in use.
    #[must_use]
    pub const fn config(&self) -> &PhaseConfig {
        &self.config
    }

    /// Length of `phase` in milliseconds.
    #[must_use]
    pub fn phase_length_ms(&self, phase: Phase) -> i64 {
        duration_ms(match phase {
            Phase::Active => self.config.active,
            Phase::ShortBreak => self.config.short_break,
            Phase::LongBreak => self.config.long_break,
        })
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Runs one tick at the clock's current time.
    ///
    /// # Errors
    ///
    /// See [`tick`](Self::tick).
    pub async fn process(&self, room: &RoomId) -> Result<TickOutcome, PhaseError> {
        self.tick(room, self.services.clock.now()).await
    }

    /// Advances `room` as of `now`, under the room's session lock.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::Cache`] if the session cannot be loaded and
    /// [`PhaseError::TransitionAborted`] if a transition failed and was
    /// rolled back.
    pub async fn tick(&self, room: &RoomId, now: Timestamp) -> Result<TickOutcome, PhaseError> {
        let _lock = self.services.locks.lock(room).await;

        let Some(session) = self.load_session(room).await? else {
            self.write_fresh_session(room, now).await?;
            return Ok(TickOutcome::Activated);
        };

        if now < session.phase_deadline {
            return Ok(TickOutcome::Idle);
        }

        let overdue = now.saturating_sub(session.phase_deadline);
        if overdue > duration_ms(self.config.overdue_grace) {
            warn!(
                %room,
                phase = %session.phase,
                deadline = %format_timestamp(session.phase_deadline),
                overdue_ms = overdue,
                "phase is overdue"
            );
        }

        if session.phase.is_break() {
            self.finish_break(&session, now).await
        } else {
            self.begin_break(&session, now).await
        }
    }

    /// Writes a fresh ACTIVE session if the room has none. Returns whether
    /// one was written.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::Cache`] if the cache cannot be read or written.
    pub async fn activate(&self, room: &RoomId, now: Timestamp) -> Result<bool, PhaseError> {
        let _lock = self.services.locks.lock(room).await;
        if self.load_session(room).await?.is_some() {
            return Ok(false);
        }
        self.write_fresh_session(room, now).await?;
        Ok(true)
    }

    /// Ends the running break of `room` as of `now`.
    ///
    /// Does not take the session lock; concurrent callers are kept apart by
    /// the dedup window and the instance registration, and all but one get
    /// [`TickOutcome::Duplicate`].
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::TransitionAborted`] if the flush failed; the
    /// room is left in its break.
    pub async fn end_break(&self, room: &RoomId, now: Timestamp) -> Result<TickOutcome, PhaseError> {
        match self.load_session(room).await? {
            Some(session) if session.phase.is_break() => self.finish_break(&session, now).await,
            _ => Ok(TickOutcome::Idle),
        }
    }

    /// Current session of `room`, loading it into the cache if needed.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::Cache`] if the initial load fails.
    pub async fn session(&self, room: &RoomId) -> Result<Option<RoomSession>, PhaseError> {
        self.load_session(room).await
    }

    /// Registers the room's driver timer, which calls
    /// [`process`](Self::process) every `phases.tick_interval`.
    pub fn start_room(&self, room: &RoomId) {
        let callback = self.process_callback(room);
        self.services
            .timers
            .set_interval(room, DRIVER_TIMER, callback, self.config.tick_interval);
        info!(%room, interval = ?self.config.tick_interval, "room driver started");
    }

    /// Stops driving `room` and drops all of its in-memory state.
    ///
    /// Timers are cancelled first, then pending changes are flushed; only
    /// after a successful flush are the cache entry, dedup entries, lock and
    /// instance registration removed.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::Cache`] if the final flush fails. The cache
    /// entry is kept in that case.
    pub async fn teardown(&self, room: &RoomId) -> Result<(), PhaseError> {
        let cleared = self.services.timers.clear_all_for_room(room);
        self.services.cache.force_flush(room).await?;
        self.services.cache.clear_room(room);
        self.services.dedup.clear_room(room);
        self.services.locks.release(room);
        self.services.instances.force_kill(room);
        info!(%room, timers = cleared, "room torn down");
        Ok(())
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    async fn begin_break(
        &self,
        session: &RoomSession,
        now: Timestamp,
    ) -> Result<TickOutcome, PhaseError> {
        let room = &session.room;
        let resolving = transition_key(session.phase, session.phase_deadline);
        if self
            .services
            .dedup
            .is_duplicate(room, &resolving, CATEGORY_TRANSITION)
        {
            return Ok(TickOutcome::Duplicate);
        }

        let kind = self.policy.next_break(session.cycle_count);
        let record = BreakRecord {
            kind,
            started_at: now,
            ends_at: now.saturating_add(self.phase_length_ms(kind)),
        };

        let write = self
            .services
            .cache
            .update_multiple(
                room,
                patch([
                    (FIELD_PHASE, json!(kind)),
                    (FIELD_DEADLINE, json!(record.ends_at)),
                    (FIELD_BREAK, json!(record)),
                ]),
            )
            .await;
        if let Err(source) = write {
            self.services
                .dedup
                .forget(room, &resolving, CATEGORY_TRANSITION);
            error!(%room, error = %source, "break start aborted");
            return Err(PhaseError::TransitionAborted {
                room: room.clone(),
                transition: "break start",
                source,
            });
        }

        self.arm_break_poll(room);
        record_phase_transition("break_start");
        info!(
            %room,
            %kind,
            cycle = session.cycle_count,
            ends_at = %format_timestamp(record.ends_at),
            "break started"
        );
        self.announce(
            room,
            &format!("started:{resolving}"),
            "break started",
            json!({
                "kind": kind,
                "endsAt": record.ends_at,
                "cycleCount": session.cycle_count,
            }),
        );
        self.services.sink.emit(Event::PhaseChanged {
            timestamp: event_time(now),
            room: room.clone(),
            from: session.phase,
            to: kind,
            cycle_count: session.cycle_count,
            deadline: record.ends_at,
        });

        Ok(TickOutcome::BreakStarted(kind))
    }

    async fn finish_break(
        &self,
        session: &RoomSession,
        now: Timestamp,
    ) -> Result<TickOutcome, PhaseError> {
        let room = &session.room;
        let resolving = transition_key(session.phase, session.phase_deadline);
        if self
            .services
            .dedup
            .is_duplicate(room, &resolving, CATEGORY_TRANSITION)
        {
            return Ok(TickOutcome::Duplicate);
        }

        let Some(claim) = self.services.instances.register_or_take_over(room) else {
            self.services
                .dedup
                .forget(room, &resolving, CATEGORY_TRANSITION);
            debug!(%room, "break end already owned by another instance");
            return Ok(TickOutcome::Duplicate);
        };

        let cycle_count = session.cycle_count.saturating_add(1);
        let deadline = now.saturating_add(self.phase_length_ms(Phase::Active));

        if let Err(source) = self.apply_break_end(room, cycle_count, deadline).await {
            self.roll_back(session).await;
            self.services
                .dedup
                .forget(room, &resolving, CATEGORY_TRANSITION);
            error!(
                %room,
                instance = %claim.instance_id(),
                error = %source,
                "break end aborted and rolled back"
            );
            return Err(PhaseError::TransitionAborted {
                room: room.clone(),
                transition: "break end",
                source,
            });
        }
        drop(claim);

        record_phase_transition("break_end");
        info!(
            %room,
            cycle = cycle_count,
            deadline = %format_timestamp(deadline),
            "break ended"
        );
        self.announce(
            room,
            &format!("ended:{resolving}"),
            "break ended",
            json!({
                "kind": session.phase,
                "cycleCount": cycle_count,
                "nextDeadline": deadline,
            }),
        );
        self.services.sink.emit(Event::PhaseChanged {
            timestamp: event_time(now),
            room: room.clone(),
            from: session.phase,
            to: Phase::Active,
            cycle_count,
            deadline,
        });

        Ok(TickOutcome::BreakEnded)
    }

    async fn apply_break_end(
        &self,
        room: &RoomId,
        cycle_count: u64,
        deadline: Timestamp,
    ) -> Result<(), CacheError> {
        let cache = &self.services.cache;
        cache.delete_field(room, FIELD_BREAK).await?;
        cache
            .update_multiple(
                room,
                patch([
                    (FIELD_PHASE, json!(Phase::Active)),
                    (FIELD_DEADLINE, json!(deadline)),
                    (FIELD_CYCLE_COUNT, json!(cycle_count)),
                ]),
            )
            .await?;
        self.services
            .timers
            .clear_prefixed(room, BREAK_TIMER_PREFIX);
        cache.force_flush(room).await?;
        Ok(())
    }

    async fn roll_back(&self, previous: &RoomSession) {
        let room = &previous.room;
        let restored = self
            .services
            .cache
            .update_multiple(room, previous.to_patch())
            .await;
        if let Err(e) = restored {
            error!(%room, error = %e, "could not restore session after failed transition");
            return;
        }
        if previous.phase.is_break() {
            self.arm_break_poll(room);
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Loads the session, treating an unreadable one as a cache miss.
    ///
    /// `None` means the caller must write a fresh session: the room either
    /// never had one or its stored session is beyond repair.
    async fn load_session(&self, room: &RoomId) -> Result<Option<RoomSession>, PhaseError> {
        let doc = self.services.cache.read(room).await?;
        match RoomSession::from_document(room, &doc) {
            Ok(session) => return Ok(session),
            Err(e) => warn!(%room, error = %e, "cached session unreadable; reloading"),
        }

        self.services.cache.initialize(room, true).await?;
        let doc = self.services.cache.read(room).await?;
        match RoomSession::from_document(room, &doc) {
            Ok(session) => Ok(session),
            Err(e) => {
                warn!(%room, error = %e, "stored session unreadable; resetting to defaults");
                Ok(None)
            }
        }
    }

    async fn write_fresh_session(&self, room: &RoomId, now: Timestamp) -> Result<(), PhaseError> {
        let deadline = self.reset_session(room, now, 0).await?;
        record_phase_transition("activate");
        info!(%room, deadline = %format_timestamp(deadline), "room activated");
        Ok(())
    }

    /// Overwrites the session with ACTIVE, a deadline one active phase from
    /// `now`, and the given cycle count; removes any break record. Returns
    /// the new deadline. Nothing is flushed.
    pub(crate) async fn reset_session(
        &self,
        room: &RoomId,
        now: Timestamp,
        cycle_count: u64,
    ) -> Result<Timestamp, CacheError> {
        let session = RoomSession {
            cycle_count,
            ..RoomSession::new(
                room.clone(),
                now.saturating_add(self.phase_length_ms(Phase::Active)),
            )
        };
        let cache = &self.services.cache;
        cache.update_multiple(room, session.to_patch()).await?;
        cache.delete_field(room, FIELD_BREAK).await?;
        Ok(session.phase_deadline)
    }

    fn arm_break_poll(&self, room: &RoomId) {
        let callback = self.process_callback(room);
        self.services.timers.set_interval(
            room,
            BREAK_POLL_TIMER,
            callback,
            self.config.break_poll_interval,
        );
    }

    fn announce(&self, room: &RoomId, key: &str, message: &str, metadata: serde_json::Value) {
        if self.services.dedup.is_duplicate(room, key, CATEGORY_BREAK) {
            return;
        }
        self.services.sink.log_event(room, message, true, metadata);
    }

    fn process_callback(&self, room: &RoomId) -> TimerCallback {
        let engine = self.me.clone();
        let room = room.clone();
        Arc::new(move || {
            let engine = engine.clone();
            let room = room.clone();
            async move {
                let Some(engine) = engine.upgrade() else {
                    return;
                };
                match engine.process(&room).await {
                    Ok(TickOutcome::Idle) => {}
                    Ok(outcome) => debug!(%room, ?outcome, "timer tick"),
                    Err(e) => warn!(%room, error = %e, "timer tick failed; retrying next tick"),
                }
            }
            .boxed()
        })
    }
}

impl std::fmt::Debug for PhaseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseEngine")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Dedup content identifying one resolution of a phase deadline.
fn transition_key(phase: Phase, deadline: Timestamp) -> String {
    format!("{phase}@{deadline}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::observability::RecordingSink;
    use crate::store::{DurableStore, MemoryStore};
    use std::time::Duration;

    const ACTIVE_MS: i64 = 25 * 60 * 1000;
    const SHORT_MS: i64 = 5 * 60 * 1000;
    const LONG_MS: i64 = 15 * 60 * 1000;

    struct Harness {
        engine: Engine,
        store: Arc<MemoryStore>,
        sink: Arc<RecordingSink>,
        room: RoomId,
    }

    fn harness() -> Harness {
        let mut config = EngineConfig::default();
        config.cache.retry.max_attempts = 2;
        config.cache.retry.base_delay = Duration::from_millis(5);
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let engine = Engine::new(
            Arc::new(config),
            Arc::clone(&store) as Arc<dyn DurableStore>,
            Arc::clone(&sink) as _,
            Arc::new(ManualClock::new(0)),
        );
        Harness {
            engine,
            store,
            sink,
            room: RoomId::new("room-1"),
        }
    }

    #[tokio::test]
    async fn first_tick_activates() {
        let h = harness();
        let phases = h.engine.phases();

        assert_eq!(phases.tick(&h.room, 100).await.unwrap(), TickOutcome::Activated);
        let session = phases.session(&h.room).await.unwrap().unwrap();
        assert_eq!(session.phase, Phase::Active);
        assert_eq!(session.phase_deadline, 100 + ACTIVE_MS);
        assert_eq!(session.cycle_count, 0);

        assert!(!phases.activate(&h.room, 200).await.unwrap());
        assert_eq!(phases.tick(&h.room, 200).await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn break_starts_at_deadline_and_is_announced_once() {
        let h = harness();
        let phases = h.engine.phases();
        phases.activate(&h.room, 0).await.unwrap();

        let outcome = phases.tick(&h.room, ACTIVE_MS).await.unwrap();
        assert_eq!(outcome, TickOutcome::BreakStarted(Phase::ShortBreak));
        assert_eq!(phases.tick(&h.room, ACTIVE_MS).await.unwrap(), TickOutcome::Idle);

        let session = phases.session(&h.room).await.unwrap().unwrap();
        assert_eq!(session.phase, Phase::ShortBreak);
        assert_eq!(session.phase_deadline, ACTIVE_MS + SHORT_MS);
        assert_eq!(
            session.break_record,
            Some(BreakRecord {
                kind: Phase::ShortBreak,
                started_at: ACTIVE_MS,
                ends_at: ACTIVE_MS + SHORT_MS,
            })
        );
        assert_eq!(h.sink.count(&h.room, "break started"), 1);
        assert_eq!(
            h.engine.timers().names(&h.room),
            vec![BREAK_POLL_TIMER.to_string()]
        );
    }

    #[tokio::test]
    async fn break_end_increments_and_flushes() {
        let h = harness();
        let phases = h.engine.phases();
        phases.activate(&h.room, 0).await.unwrap();
        phases.tick(&h.room, ACTIVE_MS).await.unwrap();

        let end = ACTIVE_MS + SHORT_MS;
        assert_eq!(phases.tick(&h.room, end).await.unwrap(), TickOutcome::BreakEnded);

        let stored = h.store.get(&h.room).unwrap();
        assert_eq!(stored.get(FIELD_PHASE), Some(&json!("ACTIVE")));
        assert_eq!(stored.get(FIELD_CYCLE_COUNT), Some(&json!(1)));
        assert_eq!(stored.get(FIELD_DEADLINE), Some(&json!(end + ACTIVE_MS)));
        assert!(!stored.contains_key(FIELD_BREAK));

        assert!(h.engine.timers().names(&h.room).is_empty());
        assert!(!h.engine.instances().is_registered(&h.room));
        assert_eq!(h.sink.count(&h.room, "break ended"), 1);
        assert!(!h.engine.cache().is_dirty(&h.room));
    }

    #[tokio::test]
    async fn fourth_break_is_long() {
        let h = harness();
        let phases = h.engine.phases();
        phases.activate(&h.room, 0).await.unwrap();

        let mut now = 0;
        let mut kinds = Vec::new();
        for _ in 0..4 {
            now += ACTIVE_MS;
            match phases.tick(&h.room, now).await.unwrap() {
                TickOutcome::BreakStarted(kind) => kinds.push(kind),
                other => panic!("expected break start, got {other:?}"),
            }
            now += phases.phase_length_ms(*kinds.last().unwrap());
            assert_eq!(phases.tick(&h.room, now).await.unwrap(), TickOutcome::BreakEnded);
        }

        assert_eq!(
            kinds,
            vec![
                Phase::ShortBreak,
                Phase::ShortBreak,
                Phase::ShortBreak,
                Phase::LongBreak
            ]
        );
        assert_eq!(phases.phase_length_ms(Phase::LongBreak), LONG_MS);
        let session = phases.session(&h.room).await.unwrap().unwrap();
        assert_eq!(session.cycle_count, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_break_end_rolls_back_then_retries() {
        let h = harness();
        let phases = h.engine.phases();
        phases.activate(&h.room, 0).await.unwrap();
        phases.tick(&h.room, ACTIVE_MS).await.unwrap();
        let end = ACTIVE_MS + SHORT_MS;

        h.store.fail_next(2);
        let err = phases.tick(&h.room, end).await.unwrap_err();
        assert!(matches!(
            err,
            PhaseError::TransitionAborted {
                transition: "break end",
                ..
            }
        ));

        let session = phases.session(&h.room).await.unwrap().unwrap();
        assert_eq!(session.phase, Phase::ShortBreak);
        assert_eq!(session.cycle_count, 0);
        assert!(session.break_record.is_some());
        assert!(!h.engine.instances().is_registered(&h.room));
        assert_eq!(h.sink.count(&h.room, "break ended"), 0);
        assert_eq!(
            h.engine.timers().names(&h.room),
            vec![BREAK_POLL_TIMER.to_string()]
        );

        assert_eq!(phases.tick(&h.room, end + 1).await.unwrap(), TickOutcome::BreakEnded);
        let stored = h.store.get(&h.room).unwrap();
        assert_eq!(stored.get(FIELD_CYCLE_COUNT), Some(&json!(1)));
        assert!(!stored.contains_key(FIELD_BREAK));
    }

    #[tokio::test]
    async fn live_instance_makes_break_end_a_duplicate() {
        let h = harness();
        let phases = h.engine.phases();
        phases.activate(&h.room, 0).await.unwrap();
        phases.tick(&h.room, ACTIVE_MS).await.unwrap();

        let claim = h.engine.instances().register(&h.room).unwrap();
        let end = ACTIVE_MS + SHORT_MS;
        assert_eq!(phases.end_break(&h.room, end).await.unwrap(), TickOutcome::Duplicate);
        drop(claim);

        let session = phases.session(&h.room).await.unwrap().unwrap();
        assert_eq!(session.phase, Phase::ShortBreak);

        // the holder is gone; the same deadline resolves right away
        assert_eq!(phases.end_break(&h.room, end).await.unwrap(), TickOutcome::BreakEnded);
        assert_eq!(h.sink.count(&h.room, "break ended"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn same_snapshot_ends_break_once() {
        let h = harness();
        let phases = h.engine.phases();
        phases.activate(&h.room, 0).await.unwrap();
        phases.tick(&h.room, ACTIVE_MS).await.unwrap();
        h.store.set_latency(Some(Duration::from_millis(20)));

        let first = phases.session(&h.room).await.unwrap().unwrap();
        let second = phases.session(&h.room).await.unwrap().unwrap();
        assert_eq!(first, second);

        let end = ACTIVE_MS + SHORT_MS;
        let (a, b) = tokio::join!(
            phases.finish_break(&first, end),
            phases.finish_break(&second, end)
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        assert_eq!(
            outcomes.iter().filter(|o| **o == TickOutcome::BreakEnded).count(),
            1
        );
        assert_eq!(
            outcomes.iter().filter(|o| **o == TickOutcome::Duplicate).count(),
            1
        );

        let stored = h.store.get(&h.room).unwrap();
        assert_eq!(stored.get(FIELD_CYCLE_COUNT), Some(&json!(first.cycle_count + 1)));
        assert_eq!(h.sink.count(&h.room, "break ended"), 1);
        assert!(!h.engine.instances().is_registered(&h.room));
    }

    #[tokio::test]
    async fn maximal_cycle_count_saturates() {
        let h = harness();
        let mut doc = crate::store::Document::new();
        doc.insert(FIELD_PHASE.into(), json!("SHORT_BREAK"));
        doc.insert(FIELD_DEADLINE.into(), json!(1_000));
        doc.insert(FIELD_CYCLE_COUNT.into(), json!(u64::MAX));
        h.store.insert(h.room.clone(), doc);

        let outcome = h.engine.phases().end_break(&h.room, 1_000).await.unwrap();
        assert_eq!(outcome, TickOutcome::BreakEnded);
        assert_eq!(
            h.store.get(&h.room).unwrap().get(FIELD_CYCLE_COUNT),
            Some(&json!(u64::MAX))
        );
    }

    #[tokio::test]
    async fn corrupt_session_is_reset() {
        let h = harness();
        let mut doc = crate::store::Document::new();
        doc.insert(FIELD_PHASE.into(), json!("NAPTIME"));
        doc.insert("aux".into(), json!("kept"));
        h.store.insert(h.room.clone(), doc);

        let outcome = h.engine.phases().tick(&h.room, 10).await.unwrap();
        assert_eq!(outcome, TickOutcome::Activated);

        let snapshot = h.engine.cache().peek(&h.room).unwrap();
        assert_eq!(snapshot.get(FIELD_PHASE), Some(&json!("ACTIVE")));
        assert_eq!(snapshot.get("aux"), Some(&json!("kept")));
    }

    #[tokio::test]
    async fn start_room_and_teardown() {
        let h = harness();
        let phases = h.engine.phases();
        phases.activate(&h.room, 0).await.unwrap();
        phases.start_room(&h.room);
        assert_eq!(
            h.engine.timers().names(&h.room),
            vec![DRIVER_TIMER.to_string()]
        );

        phases.teardown(&h.room).await.unwrap();
        assert!(h.engine.timers().names(&h.room).is_empty());
        assert!(!h.engine.cache().is_cached(&h.room));
        assert_eq!(
            h.store.get(&h.room).unwrap().get(FIELD_PHASE),
            Some(&json!("ACTIVE"))
        );
    }
}
