//! Named per-room interval timers.
//!
//! Every periodic callback in the engine goes through this registry. A
//! (room, name) key owns at most one pending timer: registering the key again
//! cancels the previous timer before the new one starts.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::store::RoomId;

/// Callback run on every tick. Returns the future to await before the next
/// tick is considered.
pub type TimerCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Cancellable handle to a registered timer.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    id: u64,
    token: CancellationToken,
}

impl TimerHandle {
    /// Registry-unique identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Returns `false` once the timer was cleared or replaced.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    fn cancel(&self) {
        self.token.cancel();
    }
}

/// Registry of live timers keyed by (room, name).
#[derive(Default)]
pub struct IntervalRegistry {
    timers: DashMap<(RoomId, String), TimerHandle>,
    next_id: AtomicU64,
}

impl IntervalRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a periodic `callback` for (room, name), replacing any
    /// existing one. The first tick fires after `delay`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn set_interval(
        &self,
        room: &RoomId,
        name: &str,
        callback: TimerCallback,
        delay: Duration,
    ) -> TimerHandle {
        let period = delay.max(Duration::from_millis(1));
        let token = CancellationToken::new();
        let handle = TimerHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            token: token.clone(),
        };

        if let Some(previous) = self
            .timers
            .insert((room.clone(), name.to_string()), handle.clone())
        {
            previous.cancel();
            debug!(%room, timer = name, "replaced existing timer");
        }
        self.update_gauge();

        let room_label = room.clone();
        let timer_name = name.to_string();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        trace!(room = %room_label, timer = %timer_name, "timer cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        callback().await;
                    }
                }
            }
        });

        handle
    }

    /// Cancels and removes (room, name). Returns whether it existed.
    pub fn clear(&self, room: &RoomId, name: &str) -> bool {
        let removed = self.timers.remove(&(room.clone(), name.to_string()));
        if let Some((_, handle)) = &removed {
            handle.cancel();
            debug!(%room, timer = name, "timer cleared");
        }
        self.update_gauge();
        removed.is_some()
    }

    /// Cancels every timer of `room`. Returns how many were cancelled.
    pub fn clear_all_for_room(&self, room: &RoomId) -> usize {
        self.clear_where(room, |_| true)
    }

    /// Cancels the timers of `room` whose name starts with `prefix`.
    pub fn clear_prefixed(&self, room: &RoomId, prefix: &str) -> usize {
        self.clear_where(room, |name| name.starts_with(prefix))
    }

    fn clear_where(&self, room: &RoomId, matches: impl Fn(&str) -> bool) -> usize {
        let mut cleared = 0;
        self.timers.retain(|(r, name), handle| {
            if r == room && matches(name) {
                handle.cancel();
                cleared += 1;
                false
            } else {
                true
            }
        });
        if cleared > 0 {
            debug!(%room, cleared, "timers cleared");
        }
        self.update_gauge();
        cleared
    }

    /// Names of the live timers of `room`, sorted.
    #[must_use]
    pub fn names(&self, room: &RoomId) -> Vec<String> {
        let mut names: Vec<String> = self
            .timers
            .iter()
            .filter(|e| &e.key().0 == room)
            .map(|e| e.key().1.clone())
            .collect();
        names.sort();
        names
    }

    /// Returns the handle registered for (room, name).
    #[must_use]
    pub fn handle(&self, room: &RoomId, name: &str) -> Option<TimerHandle> {
        self.timers
            .get(&(room.clone(), name.to_string()))
            .map(|h| h.value().clone())
    }

    /// Number of registered timers across all rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Returns `true` if no timers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Cancels every timer.
    pub fn shutdown(&self) {
        for entry in &self.timers {
            entry.value().cancel();
        }
        self.timers.clear();
        self.update_gauge();
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_gauge(&self) {
        metrics::gauge!("roomkeeper_timers_active").set(self.timers.len() as f64);
    }
}

impl std::fmt::Debug for IntervalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalRegistry")
            .field("timers", &self.timers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback(counter: &Arc<AtomicUsize>) -> TimerCallback {
        let counter = Arc::clone(counter);
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn interval_fires_periodically() {
        let registry = IntervalRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let room = RoomId::new("r1");

        registry.set_interval(&room, "poll", counting_callback(&hits), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn re_register_replaces_previous() {
        let registry = IntervalRegistry::new();
        let first_hits = Arc::new(AtomicUsize::new(0));
        let second_hits = Arc::new(AtomicUsize::new(0));
        let room = RoomId::new("r1");

        let first = registry.set_interval(
            &room,
            "x",
            counting_callback(&first_hits),
            Duration::from_secs(1),
        );
        let second = registry.set_interval(
            &room,
            "x",
            counting_callback(&second_hits),
            Duration::from_secs(1),
        );

        assert!(!first.is_active());
        assert!(second.is_active());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names(&room), vec!["x".to_string()]);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(first_hits.load(Ordering::SeqCst), 0);
        assert_eq!(second_hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_stops_timer() {
        let registry = IntervalRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let room = RoomId::new("r1");

        let handle =
            registry.set_interval(&room, "poll", counting_callback(&hits), Duration::from_secs(1));
        assert!(registry.clear(&room, "poll"));
        assert!(!registry.clear(&room, "poll"));
        assert!(!handle.is_active());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn clear_all_and_prefixed() {
        let registry = IntervalRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let a = RoomId::new("a");
        let b = RoomId::new("b");
        let long = Duration::from_secs(3600);

        registry.set_interval(&a, "break:poll", counting_callback(&hits), long);
        registry.set_interval(&a, "break:announce", counting_callback(&hits), long);
        registry.set_interval(&a, "driver:tick", counting_callback(&hits), long);
        registry.set_interval(&b, "break:poll", counting_callback(&hits), long);

        assert_eq!(registry.clear_prefixed(&a, "break:"), 2);
        assert_eq!(registry.names(&a), vec!["driver:tick".to_string()]);
        assert_eq!(registry.names(&b), vec!["break:poll".to_string()]);

        assert_eq!(registry.clear_all_for_room(&a), 1);
        assert!(registry.names(&a).is_empty());
        assert_eq!(registry.len(), 1);

        registry.shutdown();
        assert!(registry.is_empty());
    }
}
