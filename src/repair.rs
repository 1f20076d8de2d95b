//! Operator introspection and repair.
//!
//! Rooms can get stuck when a driver dies mid-transition: a break that
//! never ends, a break record left behind after ACTIVE was written, or an
//! instance registration nobody will release. These operations inspect and
//! fix such rooms without going around the cache.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::clock::{Timestamp, duration_ms};
use crate::config::schema::RepairConfig;
use crate::engine::RoomServices;
use crate::error::{PhaseError, StoreError};
use crate::observability::events::{Event, event_time};
use crate::observability::metrics::record_phase_transition;
use crate::phase::engine::BREAK_TIMER_PREFIX;
use crate::phase::state::{FIELD_BREAK, FIELD_PHASE};
use crate::phase::{BreakRecord, Phase, PhaseEngine};
use crate::store::RoomId;

// ============================================================================
// Reports
// ============================================================================

/// Where a status snapshot was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    /// The live cache entry.
    Cache,
    /// The durable store (room not cached).
    Store,
    /// Neither has the room.
    Missing,
}

/// Read-only view of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomStatus {
    /// Room inspected.
    pub room: RoomId,
    /// Where the session was read from.
    pub source: StatusSource,
    /// Current phase, if a session exists.
    pub phase: Option<Phase>,
    /// Deadline of the current phase.
    pub phase_deadline: Option<Timestamp>,
    /// Completed breaks.
    pub cycle_count: Option<u64>,
    /// Running break.
    pub break_record: Option<BreakRecord>,
    /// Why the session could not be read, if it could not.
    pub session_error: Option<String>,
    /// Whether a session lock is held.
    pub locked: bool,
    /// Holder of the session lock.
    pub lock_holder: Option<String>,
    /// Registered instance id.
    pub instance: Option<String>,
    /// When the instance registered.
    pub instance_registered_at: Option<Timestamp>,
    /// Live timer names.
    pub timers: Vec<String>,
    /// Whether the room has a cache entry.
    pub cached: bool,
    /// Whether the cache entry has unflushed changes.
    pub dirty: bool,
}

/// What [`RepairFacade::repair`] did to one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairOutcome {
    /// Room examined.
    pub room: RoomId,
    /// Whether anything was changed.
    pub repaired: bool,
    /// Changes applied, in order.
    pub actions: Vec<String>,
    /// Conditions worth an operator's attention.
    pub warnings: Vec<String>,
}

/// A room that could not be repaired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairFailure {
    /// Room that failed.
    pub room: RoomId,
    /// Error text.
    pub error: String,
}

/// Result of [`RepairFacade::repair_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// Rooms examined.
    pub checked: usize,
    /// Rooms that were changed.
    pub repaired: Vec<RoomId>,
    /// Rooms whose repair failed.
    pub failed: Vec<RepairFailure>,
    /// Warnings from every room, prefixed with the room id.
    pub warnings: Vec<String>,
}

// ============================================================================
// RepairFacade
// ============================================================================

/// Operator entry point for status and repair.
pub struct RepairFacade {
    config: RepairConfig,
    services: RoomServices,
    phases: Arc<PhaseEngine>,
}

impl RepairFacade {
    /// Creates a facade over the engine's shared services.
    #[must_use]
    pub const fn new(config: RepairConfig, services: RoomServices, phases: Arc<PhaseEngine>) -> Self {
        Self {
            config,
            services,
            phases,
        }
    }

    /// Describes `room` without changing anything.
    ///
    /// Reads the cached snapshot when the room is cached and the store
    /// otherwise; the store read does not populate the cache.
    ///
    /// # Errors
    ///
    /// Returns the store error if an uncached room cannot be read.
    pub async fn status(&self, room: &RoomId) -> Result<RoomStatus, StoreError> {
        let cache = &self.services.cache;
        let (doc, source) = match cache.peek(room) {
            Some(doc) => (Some(doc), StatusSource::Cache),
            None => match cache.store().find_one(room).await? {
                Some(doc) => (Some(doc), StatusSource::Store),
                None => (None, StatusSource::Missing),
            },
        };

        let mut status = RoomStatus {
            room: room.clone(),
            source,
            phase: None,
            phase_deadline: None,
            cycle_count: None,
            break_record: None,
            session_error: None,
            locked: false,
            lock_holder: None,
            instance: None,
            instance_registered_at: None,
            timers: self.services.timers.names(room),
            cached: cache.is_cached(room),
            dirty: cache.is_dirty(room),
        };

        if let Some(doc) = doc {
            match crate::phase::RoomSession::from_document(room, &doc) {
                Ok(Some(session)) => {
                    status.phase = Some(session.phase);
                    status.phase_deadline = Some(session.phase_deadline);
                    status.cycle_count = Some(session.cycle_count);
                    status.break_record = session.break_record;
                }
                Ok(None) => {}
                Err(e) => status.session_error = Some(e.to_string()),
            }
        }

        if let Some(record) = self.services.locks.record_for(room) {
            status.locked = true;
            status.lock_holder = Some(record.holder_trace);
        }
        if let Some(reg) = self.services.instances.registration(room) {
            status.instance = Some(reg.instance_id.to_string());
            status.instance_registered_at = Some(reg.registered_at);
        }

        Ok(status)
    }

    /// Removes the running break regardless of the phase field: kills the
    /// instance registration, deletes the break record, flushes, and
    /// cancels break timers. Returns the actions taken.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::Cache`] if the room cannot be loaded or
    /// flushed.
    pub async fn force_clear_break(&self, room: &RoomId) -> Result<Vec<String>, PhaseError> {
        let mut actions = Vec::new();
        self.clear_break(room, &mut actions).await?;
        self.services.cache.force_flush(room).await?;
        info!(%room, ?actions, "break force-cleared");
        Ok(actions)
    }

    /// Repairs `room` if it is stuck.
    ///
    /// A room is stuck when its break is overdue by more than
    /// `repair.overdue_margin`, when its phase and break record disagree,
    /// or when it has no readable session. Stuck rooms have their break
    /// cleared and are re-derived as ACTIVE with a fresh deadline; an
    /// abandoned break counts as a completed cycle.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError::Cache`] on load or flush failure.
    pub async fn repair(&self, room: &RoomId) -> Result<RepairOutcome, PhaseError> {
        let _lock = self.services.locks.lock(room).await;
        let now = self.services.clock.now();
        let mut outcome = RepairOutcome {
            room: room.clone(),
            repaired: false,
            actions: Vec::new(),
            warnings: Vec::new(),
        };

        self.kill_stale_instance(room, now, &mut outcome);

        let session = self.phases.session(room).await?;
        let next_cycle = match &session {
            None => {
                let had_phase = self
                    .services
                    .cache
                    .peek(room)
                    .is_some_and(|doc| doc.contains_key(FIELD_PHASE));
                outcome.warnings.push(if had_phase {
                    "session unreadable; reset to defaults".to_string()
                } else {
                    "room had no session; activated".to_string()
                });
                Some(0)
            }
            Some(session) => {
                let overdue = now.saturating_sub(session.phase_deadline);
                let margin = duration_ms(self.config.overdue_margin);
                if session.phase.is_break() && overdue > margin {
                    outcome.warnings.push(format!(
                        "{} overdue by {}s",
                        session.phase,
                        overdue / 1000
                    ));
                    Some(session.cycle_count.saturating_add(1))
                } else if session.is_inconsistent() {
                    outcome.warnings.push(format!(
                        "phase {} disagrees with break record",
                        session.phase
                    ));
                    Some(
                        session
                            .cycle_count
                            .saturating_add(u64::from(session.phase.is_break())),
                    )
                } else {
                    None
                }
            }
        };

        if let Some(cycle_count) = next_cycle {
            self.clear_break(room, &mut outcome.actions).await?;
            let deadline = self.phases.reset_session(room, now, cycle_count).await?;
            outcome
                .actions
                .push(format!("reset to ACTIVE (cycle {cycle_count}, deadline {deadline})"));
            self.services.cache.force_flush(room).await?;
            record_phase_transition("repair");
        }

        outcome.repaired = !outcome.actions.is_empty();
        if outcome.repaired {
            warn!(%room, actions = ?outcome.actions, "room repaired");
            self.services.sink.emit(Event::RepairApplied {
                timestamp: event_time(now),
                room: room.clone(),
                actions: outcome.actions.clone(),
            });
        }
        Ok(outcome)
    }

    /// Repairs every room known to the store or the cache.
    ///
    /// A failing room is recorded and skipped; the sweep always completes.
    pub async fn repair_all(&self) -> RepairReport {
        let mut report = RepairReport::default();

        let mut rooms: BTreeSet<RoomId> = self.services.cache.room_ids().into_iter().collect();
        match self.services.cache.store().room_ids().await {
            Ok(stored) => rooms.extend(stored),
            Err(e) => report
                .warnings
                .push(format!("could not list stored rooms: {e}")),
        }

        for room in rooms {
            report.checked += 1;
            match self.repair(&room).await {
                Ok(outcome) => {
                    report
                        .warnings
                        .extend(outcome.warnings.iter().map(|w| format!("{room}: {w}")));
                    if outcome.repaired {
                        report.repaired.push(room);
                    }
                }
                Err(e) => {
                    warn!(%room, error = %e, "repair failed");
                    report.failed.push(RepairFailure {
                        room,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            checked = report.checked,
            repaired = report.repaired.len(),
            failed = report.failed.len(),
            "repair sweep finished"
        );
        report
    }

    async fn clear_break(&self, room: &RoomId, actions: &mut Vec<String>) -> Result<(), PhaseError> {
        if self.services.instances.force_kill(room) {
            actions.push("killed instance registration".to_string());
        }
        let had_break = self
            .services
            .cache
            .read(room)
            .await?
            .contains_key(FIELD_BREAK);
        self.services.cache.delete_field(room, FIELD_BREAK).await?;
        if had_break {
            actions.push("deleted break record".to_string());
        }
        let cleared = self
            .services
            .timers
            .clear_prefixed(room, BREAK_TIMER_PREFIX);
        if cleared > 0 {
            actions.push(format!("cancelled {cleared} break timer(s)"));
        }
        Ok(())
    }

    fn kill_stale_instance(&self, room: &RoomId, now: Timestamp, outcome: &mut RepairOutcome) {
        if let Some(reg) = self.services.instances.evict_stale(room) {
            let age = now.saturating_sub(reg.registered_at);
            outcome.actions.push(format!(
                "killed stale instance {} (age {}s)",
                reg.instance_id,
                age / 1000
            ));
        }
    }
}

impl std::fmt::Debug for RepairFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepairFacade")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
