//! Advisory per-room session locks.
//!
//! A lock is a cooperative marker, not an enforced exclusion. Waiting never
//! blocks forever: once the acquire timeout elapses the current holder is
//! evicted and the caller proceeds. Records older than the staleness
//! threshold are treated as abandoned and dropped whenever they are looked at.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::clock::{Clock, Timestamp, duration_ms};
use crate::config::schema::LockConfig;
use crate::store::RoomId;

/// A held lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    /// Room the lock covers.
    pub room: RoomId,
    /// When the lock was taken.
    pub acquired_at: Timestamp,
    /// Opaque token identifying the holder, for debugging.
    pub holder_trace: String,
}

/// Snapshot of lock state for operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct LockDebugInfo {
    /// Rooms currently locked, sorted.
    pub locked_room_ids: Vec<RoomId>,
}

/// Advisory lock table.
pub struct SessionLockManager {
    records: DashMap<RoomId, LockRecord>,
    released: Notify,
    next_trace: AtomicU64,
    clock: Arc<dyn Clock>,
    config: LockConfig,
}

impl SessionLockManager {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new(config: LockConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            released: Notify::new(),
            next_trace: AtomicU64::new(1),
            clock,
            config,
        }
    }

    /// Waits until `room` is free or `timeout` elapses, then takes the lock.
    ///
    /// On timeout the existing holder is evicted with a warning. Always
    /// returns `true`.
    pub async fn acquire(&self, room: &RoomId, timeout: Duration) -> bool {
        self.acquire_traced(room, timeout).await;
        true
    }

    /// Acquires with the configured timeout and returns a guard that releases
    /// the lock on drop.
    pub async fn lock(&self, room: &RoomId) -> SessionLockGuard<'_> {
        let holder_trace = self.acquire_traced(room, self.config.acquire_timeout).await;
        SessionLockGuard {
            manager: self,
            room: room.clone(),
            holder_trace,
        }
    }

    async fn acquire_traced(&self, room: &RoomId, timeout: Duration) -> String {
        let trace = format!("lock-{}", self.next_trace.fetch_add(1, Ordering::Relaxed));
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.evict_stale(room);
            if self.try_insert(room, &trace) {
                debug!(%room, holder = %trace, "session lock acquired");
                return trace;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                if let Some((_, evicted)) = self.records.remove(room) {
                    warn!(
                        %room,
                        holder = %evicted.holder_trace,
                        ?timeout,
                        "lock acquire timed out; evicting current holder"
                    );
                    metrics::counter!("roomkeeper_lock_evictions_total", "reason" => "timeout")
                        .increment(1);
                }
                if self.try_insert(room, &trace) {
                    return trace;
                }
                // someone slipped in between the eviction and our insert
                self.records.insert(room.clone(), self.record(room, &trace));
                return trace;
            }
        }
    }

    fn record(&self, room: &RoomId, trace: &str) -> LockRecord {
        LockRecord {
            room: room.clone(),
            acquired_at: self.clock.now(),
            holder_trace: trace.to_string(),
        }
    }

    fn try_insert(&self, room: &RoomId, trace: &str) -> bool {
        match self.records.entry(room.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(self.record(room, trace));
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Removes the lock for `room` regardless of holder. Idempotent.
    pub fn release(&self, room: &RoomId) {
        if self.records.remove(room).is_some() {
            debug!(%room, "session lock released");
        }
        self.released.notify_waiters();
    }

    fn release_holder(&self, room: &RoomId, holder_trace: &str) {
        let removed = self
            .records
            .remove_if(room, |_, rec| rec.holder_trace == holder_trace);
        if removed.is_some() {
            debug!(%room, holder = %holder_trace, "session lock released");
        } else {
            debug!(%room, holder = %holder_trace, "lock already evicted; nothing to release");
        }
        self.released.notify_waiters();
    }

    /// Returns whether `room` is locked, evicting a stale record first.
    pub fn is_locked(&self, room: &RoomId) -> bool {
        self.evict_stale(room);
        self.records.contains_key(room)
    }

    /// Returns the current record for `room`, if any.
    #[must_use]
    pub fn record_for(&self, room: &RoomId) -> Option<LockRecord> {
        self.records.get(room).map(|r| r.value().clone())
    }

    /// Lists locked rooms.
    #[must_use]
    pub fn debug_info(&self) -> LockDebugInfo {
        let mut locked_room_ids: Vec<RoomId> =
            self.records.iter().map(|e| e.key().clone()).collect();
        locked_room_ids.sort();
        LockDebugInfo { locked_room_ids }
    }

    fn evict_stale(&self, room: &RoomId) {
        let now = self.clock.now();
        let stale_ms = duration_ms(self.config.stale_after);
        let evicted = self
            .records
            .remove_if(room, |_, rec| now.saturating_sub(rec.acquired_at) > stale_ms);
        if let Some((_, rec)) = evicted {
            warn!(
                %room,
                holder = %rec.holder_trace,
                age_ms = now.saturating_sub(rec.acquired_at),
                "evicting stale session lock"
            );
            metrics::counter!("roomkeeper_lock_evictions_total", "reason" => "stale").increment(1);
            self.released.notify_waiters();
        }
    }
}

impl std::fmt::Debug for SessionLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLockManager")
            .field("locked", &self.records.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Releases its lock on drop, unless the lock was evicted and re-taken by
/// someone else in the meantime.
#[derive(Debug)]
pub struct SessionLockGuard<'a> {
    manager: &'a SessionLockManager,
    room: RoomId,
    holder_trace: String,
}

impl SessionLockGuard<'_> {
    /// Holder token of this guard.
    #[must_use]
    pub fn holder_trace(&self) -> &str {
        &self.holder_trace
    }
}

impl Drop for SessionLockGuard<'_> {
    fn drop(&mut self) {
        self.manager.release_holder(&self.room, &self.holder_trace);
    }
}
