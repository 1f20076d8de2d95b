//! Duplicate-event suppression window.
//!
//! Entries are keyed by room and a 64-bit hash of (category, content).
//! Collisions are accepted; the window only has to stop rapid-fire
//! repeats, not guarantee exactly-once delivery.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::clock::{Clock, Timestamp, duration_ms};
use crate::config::schema::DedupConfig;
use crate::observability::metrics::record_dedup_suppressed;
use crate::store::RoomId;

/// TTL-bounded set of recently emitted events.
pub struct DedupWindow {
    entries: DashMap<(RoomId, u64), Timestamp>,
    clock: Arc<dyn Clock>,
    config: DedupConfig,
}

fn content_hash(category: &str, content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    category.hash(&mut hasher);
    content.hash(&mut hasher);
    hasher.finish()
}

impl DedupWindow {
    /// Creates an empty window.
    #[must_use]
    pub fn new(config: DedupConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            config,
        }
    }

    /// Returns `true` if the same (category, content) was seen for `room`
    /// within the category's window. Otherwise records it and returns `false`.
    ///
    /// The check and the insert happen under one shard lock, so of several
    /// racing callers exactly one sees `false`.
    pub fn is_duplicate(&self, room: &RoomId, content: &str, category: &str) -> bool {
        let now = self.clock.now();
        let expires_at = now.saturating_add(duration_ms(self.config.ttl_for(category)));
        let key = (room.clone(), content_hash(category, content));

        match self.entries.entry(key) {
            Entry::Occupied(live) if *live.get() > now => {
                debug!(%room, category, "suppressing duplicate event");
                record_dedup_suppressed(category);
                true
            }
            Entry::Occupied(mut expired) => {
                expired.insert(expires_at);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(expires_at);
                false
            }
        }
    }

    /// Drops one entry so the same event may be emitted again immediately.
    pub fn forget(&self, room: &RoomId, content: &str, category: &str) {
        self.entries
            .remove(&(room.clone(), content_hash(category, content)));
    }

    /// Drops every entry for `room`.
    pub fn clear_room(&self, room: &RoomId) {
        self.entries.retain(|(r, _), _| r != room);
    }

    /// Drops expired entries across all rooms. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Number of tracked entries, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for DedupWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupWindow")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    fn window() -> (Arc<ManualClock>, DedupWindow) {
        let clock = Arc::new(ManualClock::new(0));
        let w = DedupWindow::new(DedupConfig::default(), Arc::clone(&clock) as Arc<dyn Clock>);
        (clock, w)
    }

    #[test]
    fn duplicate_within_ttl_then_expires() {
        let (clock, w) = window();
        let room = RoomId::new("r1");
        let ttl = DedupConfig::default().ttl_for("break");

        assert!(!w.is_duplicate(&room, "msg", "break"));
        assert!(w.is_duplicate(&room, "msg", "break"));

        clock.advance(ttl);
        assert!(!w.is_duplicate(&room, "msg", "break"));
        assert!(w.is_duplicate(&room, "msg", "break"));
    }

    #[test]
    fn rooms_and_categories_are_independent() {
        let (_, w) = window();
        assert!(!w.is_duplicate(&RoomId::new("a"), "msg", "break"));
        assert!(!w.is_duplicate(&RoomId::new("b"), "msg", "break"));
        assert!(!w.is_duplicate(&RoomId::new("a"), "msg", "announce"));
        assert!(!w.is_duplicate(&RoomId::new("a"), "other", "break"));
    }

    #[test]
    fn forget_allows_immediate_repeat() {
        let (_, w) = window();
        let room = RoomId::new("r1");
        assert!(!w.is_duplicate(&room, "x", "transition"));
        w.forget(&room, "x", "transition");
        assert!(!w.is_duplicate(&room, "x", "transition"));
    }

    #[test]
    fn clear_room_only_touches_that_room() {
        let (_, w) = window();
        let a = RoomId::new("a");
        let b = RoomId::new("b");
        w.is_duplicate(&a, "x", "break");
        w.is_duplicate(&b, "x", "break");

        w.clear_room(&a);
        assert!(!w.is_duplicate(&a, "x", "break"));
        assert!(w.is_duplicate(&b, "x", "break"));
    }

    #[test]
    fn purge_removes_only_expired() {
        let (clock, w) = window();
        let room = RoomId::new("r1");
        w.is_duplicate(&room, "short", "misc");
        w.is_duplicate(&room, "long", "break");

        clock.advance(Duration::from_secs(6));
        assert_eq!(w.purge_expired(), 1);
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn concurrent_callers_one_winner() {
        let (_, w) = window();
        let w = Arc::new(w);
        let room = RoomId::new("r1");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let w = Arc::clone(&w);
                let room = room.clone();
                std::thread::spawn(move || w.is_duplicate(&room, "end", "transition"))
            })
            .collect();
        let firsts = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|dup| !dup)
            .count();
        assert_eq!(firsts, 1);
    }
}
