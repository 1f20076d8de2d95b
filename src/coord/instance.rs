//! Single-writer instance registrations.
//!
//! A driver about to run a multi-step exclusive operation for a room
//! registers itself first. A second registration for the same room fails
//! until the first is killed, either by its owner or by a forced takeover.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::{Clock, Timestamp, duration_ms};
use crate::config::schema::InstanceConfig;
use crate::store::RoomId;

/// The driver currently registered for a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceRegistration {
    /// Identifier handed to the registering driver.
    pub instance_id: Uuid,
    /// When the registration was made.
    pub registered_at: Timestamp,
}

/// Registration table.
pub struct InstanceManager {
    registrations: DashMap<RoomId, InstanceRegistration>,
    clock: Arc<dyn Clock>,
    config: InstanceConfig,
}

impl InstanceManager {
    /// Creates an empty table.
    #[must_use]
    pub fn new(config: InstanceConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            registrations: DashMap::new(),
            clock,
            config,
        }
    }

    /// Registers a new instance for `room`.
    ///
    /// Returns `None` if the room already has a registration. The returned
    /// claim kills its own registration when dropped.
    #[must_use]
    pub fn register(&self, room: &RoomId) -> Option<InstanceClaim<'_>> {
        match self.registrations.entry(room.clone()) {
            Entry::Occupied(existing) => {
                debug!(
                    %room,
                    holder = %existing.get().instance_id,
                    "instance already registered"
                );
                None
            }
            Entry::Vacant(slot) => {
                let registration = InstanceRegistration {
                    instance_id: Uuid::new_v4(),
                    registered_at: self.clock.now(),
                };
                slot.insert(registration);
                debug!(%room, instance = %registration.instance_id, "instance registered");
                Some(InstanceClaim {
                    manager: self,
                    room: room.clone(),
                    instance_id: registration.instance_id,
                    armed: true,
                })
            }
        }
    }

    /// Registers, force-killing an existing registration first if it is
    /// older than `instances.stale_after`.
    ///
    /// A live registration still makes this return `None`.
    #[must_use]
    pub fn register_or_take_over(&self, room: &RoomId) -> Option<InstanceClaim<'_>> {
        if let Some(claim) = self.register(room) {
            return Some(claim);
        }
        if self.evict_stale(room).is_some() {
            metrics::counter!("roomkeeper_instance_takeovers_total").increment(1);
            return self.register(room);
        }
        None
    }

    /// Removes the registration for `room` if it is older than
    /// `instances.stale_after`, returning it.
    pub fn evict_stale(&self, room: &RoomId) -> Option<InstanceRegistration> {
        let now = self.clock.now();
        let stale_ms = duration_ms(self.config.stale_after);
        let (_, reg) = self.registrations.remove_if(room, |_, reg| {
            now.saturating_sub(reg.registered_at) > stale_ms
        })?;
        warn!(
            %room,
            instance = %reg.instance_id,
            age_ms = now.saturating_sub(reg.registered_at),
            "evicted orphaned instance registration"
        );
        Some(reg)
    }

    /// Removes the registration for `room` only if it belongs to `instance_id`.
    pub fn kill(&self, room: &RoomId, instance_id: Uuid) -> bool {
        let removed = self
            .registrations
            .remove_if(room, |_, reg| reg.instance_id == instance_id)
            .is_some();
        if removed {
            debug!(%room, instance = %instance_id, "instance killed");
        }
        removed
    }

    /// Removes the registration for `room` unconditionally.
    pub fn force_kill(&self, room: &RoomId) -> bool {
        match self.registrations.remove(room) {
            Some((_, reg)) => {
                warn!(%room, instance = %reg.instance_id, "instance force-killed");
                true
            }
            None => false,
        }
    }

    /// Returns the registration for `room`, if any.
    #[must_use]
    pub fn registration(&self, room: &RoomId) -> Option<InstanceRegistration> {
        self.registrations.get(room).map(|r| *r.value())
    }

    /// Returns whether `room` has a registration.
    #[must_use]
    pub fn is_registered(&self, room: &RoomId) -> bool {
        self.registrations.contains_key(room)
    }

    /// Lists rooms with a registration, sorted.
    #[must_use]
    pub fn registered_rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self
            .registrations
            .iter()
            .map(|e| e.key().clone())
            .collect();
        rooms.sort();
        rooms
    }
}

impl std::fmt::Debug for InstanceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceManager")
            .field("registered", &self.registrations.len())
            .finish_non_exhaustive()
    }
}

/// A live registration. Dropping it kills the registration, so every exit
/// path of the owning operation releases the room.
#[derive(Debug)]
pub struct InstanceClaim<'a> {
    manager: &'a InstanceManager,
    room: RoomId,
    instance_id: Uuid,
    armed: bool,
}

impl InstanceClaim<'_> {
    /// Identifier of this registration.
    #[must_use]
    pub const fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Leaves the registration in place without killing it, as a crashed
    /// driver would.
    #[must_use]
    pub fn detach(mut self) -> Uuid {
        self.armed = false;
        self.instance_id
    }
}

impl Drop for InstanceClaim<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.manager.kill(&self.room, self.instance_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn manager() -> (Arc<ManualClock>, InstanceManager) {
        let clock = Arc::new(ManualClock::new(0));
        let mgr = InstanceManager::new(
            InstanceConfig::default(),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        (clock, mgr)
    }

    #[test]
    fn second_register_fails_until_force_kill() {
        let (_, mgr) = manager();
        let room = RoomId::new("r1");

        let first = mgr.register(&room).expect("first register succeeds");
        assert!(mgr.register(&room).is_none());

        let _orphan = first.detach();
        assert!(mgr.register(&room).is_none());

        assert!(mgr.force_kill(&room));
        assert!(mgr.register(&room).is_some());
    }

    #[test]
    fn drop_kills_registration() {
        let (_, mgr) = manager();
        let room = RoomId::new("r1");
        {
            let _claim = mgr.register(&room).unwrap();
            assert!(mgr.is_registered(&room));
        }
        assert!(!mgr.is_registered(&room));
    }

    #[test]
    fn kill_ignores_foreign_instance() {
        let (_, mgr) = manager();
        let room = RoomId::new("r1");
        let claim = mgr.register(&room).unwrap();

        assert!(!mgr.kill(&room, Uuid::new_v4()));
        assert!(mgr.is_registered(&room));
        assert!(mgr.kill(&room, claim.instance_id()));
        assert!(!mgr.is_registered(&room));
    }

    #[test]
    fn takeover_only_when_stale() {
        let (clock, mgr) = manager();
        let room = RoomId::new("r1");
        let orphan = mgr.register(&room).unwrap().detach();

        assert!(mgr.register_or_take_over(&room).is_none());

        clock.advance(Duration::from_secs(61));
        let claim = mgr.register_or_take_over(&room).expect("stale holder replaced");
        assert_ne!(claim.instance_id(), orphan);
    }

    #[test]
    fn force_kill_missing_is_false() {
        let (_, mgr) = manager();
        assert!(!mgr.force_kill(&RoomId::new("none")));
        assert!(mgr.registered_rooms().is_empty());
    }
}
