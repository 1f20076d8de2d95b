//! Write-back cache
//!
//! One entry per room holds the authoritative in-memory document. Mutations
//! land in the snapshot immediately and are tracked as dirty paths; the
//! store only sees them on an explicit [`WriteBackCache::force_flush`] or on
//! the background flush task.
//!
//! While an entry exists the store is not read again for that room unless a
//! forced refresh is requested.

mod dirty;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, Timestamp};
use crate::coord::BackoffPolicy;
use crate::error::{CacheError, StoreError};
use crate::store::path::{self, remove_path, set_path};
use crate::store::{Document, DurableStore, FieldPatch, RoomId};

use dirty::DirtySet;

// ============================================================================
// Cache Entry
// ============================================================================

struct EntryState {
    snapshot: Document,
    dirty: DirtySet,
    loaded_at: Timestamp,
    last_flushed_at: Option<Timestamp>,
}

struct CacheEntry {
    state: Mutex<EntryState>,
    /// Serializes flushes of the same room.
    flush_lock: tokio::sync::Mutex<()>,
}

impl CacheEntry {
    fn new(snapshot: Document, loaded_at: Timestamp) -> Self {
        Self {
            state: Mutex::new(EntryState {
                snapshot,
                dirty: DirtySet::default(),
                loaded_at,
                last_flushed_at: None,
            }),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn state(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().expect("cache entry lock poisoned")
    }
}

/// Point-in-time facts about a cached room, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInfo {
    /// When the entry was loaded from the store.
    pub loaded_at: Timestamp,
    /// When the last successful flush completed.
    pub last_flushed_at: Option<Timestamp>,
    /// Number of paths waiting to be flushed.
    pub dirty_paths: usize,
}

// ============================================================================
// WriteBackCache
// ============================================================================

/// Per-room write-back cache in front of a [`DurableStore`].
pub struct WriteBackCache {
    store: Arc<dyn DurableStore>,
    entries: DashMap<RoomId, Arc<CacheEntry>>,
    retry: BackoffPolicy,
    clock: Arc<dyn Clock>,
}

impl WriteBackCache {
    /// Creates an empty cache over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>, retry: BackoffPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            entries: DashMap::new(),
            retry,
            clock,
        }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    /// Loads `room` from the store if it is not cached, or unconditionally
    /// when `force_refresh` is set.
    ///
    /// A room the store has never seen starts as an empty document. A forced
    /// refresh replaces the entry and discards unflushed changes.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Store`] once the retry budget is spent.
    pub async fn initialize(&self, room: &RoomId, force_refresh: bool) -> Result<(), CacheError> {
        if !force_refresh && self.entries.contains_key(room) {
            return Ok(());
        }

        let doc = self.load(room).await?;
        let entry = Arc::new(CacheEntry::new(doc, self.clock.now()));

        if force_refresh {
            if let Some(previous) = self.entries.insert(room.clone(), entry) {
                let dirty = previous.state().dirty.len();
                if dirty > 0 {
                    warn!(%room, dirty, "forced refresh discarded unflushed changes");
                }
            }
            debug!(%room, "cache entry refreshed");
        } else {
            // a concurrent load may have won; keep whichever landed first
            self.entries.entry(room.clone()).or_insert(entry);
            debug!(%room, "cache entry loaded");
        }
        self.update_gauge();
        Ok(())
    }

    /// Returns a copy of the room's snapshot, loading it on first access.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Store`] if the initial load fails.
    pub async fn read(&self, room: &RoomId) -> Result<Document, CacheError> {
        let entry = self.entry(room).await?;
        let snapshot = entry.state().snapshot.clone();
        Ok(snapshot)
    }

    /// Alias of [`read`](Self::read).
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read).
    pub async fn get_cached_snapshot(&self, room: &RoomId) -> Result<Document, CacheError> {
        self.read(room).await
    }

    /// Cached snapshot without touching the store.
    #[must_use]
    pub fn peek(&self, room: &RoomId) -> Option<Document> {
        self.entries
            .get(room)
            .map(|entry| entry.state().snapshot.clone())
    }

    /// Merges `patch` into the snapshot and marks each path dirty.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidPath`] for a malformed path (nothing is
    /// applied in that case), or [`CacheError::Store`] if the initial load
    /// fails.
    pub async fn update_multiple(&self, room: &RoomId, patch: FieldPatch) -> Result<(), CacheError> {
        if let Some(bad) = patch.keys().find(|p| !path::is_valid(p)) {
            return Err(CacheError::InvalidPath(bad.clone()));
        }
        let entry = self.entry(room).await?;
        let mut state = entry.state();
        for (field, value) in patch {
            set_path(&mut state.snapshot, &field, value);
            state.dirty.mark_set(&field);
        }
        Ok(())
    }

    /// Removes `field` from the snapshot and marks it for unsetting.
    ///
    /// # Errors
    ///
    /// Same as [`update_multiple`](Self::update_multiple).
    pub async fn delete_field(&self, room: &RoomId, field: &str) -> Result<(), CacheError> {
        if !path::is_valid(field) {
            return Err(CacheError::InvalidPath(field.to_string()));
        }
        let entry = self.entry(room).await?;
        let mut state = entry.state();
        remove_path(&mut state.snapshot, field);
        state.dirty.mark_unset(field);
        Ok(())
    }

    /// Writes every dirty path of `room` in one store call.
    ///
    /// Returns the number of paths written; an uncached or clean room
    /// flushes nothing. Flushes of the same room run one at a time.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Store`] after the retry budget is spent. The
    /// paths stay dirty and are retried by the next flush.
    pub async fn force_flush(&self, room: &RoomId) -> Result<usize, CacheError> {
        let Some(entry) = self.entries.get(room).map(|e| Arc::clone(e.value())) else {
            return Ok(0);
        };
        let _flushing = entry.flush_lock.lock().await;

        let (pending, set, unset) = {
            let mut state = entry.state();
            if state.dirty.is_empty() {
                return Ok(0);
            }
            let pending = state.dirty.take();
            let (set, unset) = pending.to_patch(&state.snapshot);
            (pending, set, unset)
        };

        let result = self
            .retry
            .retry(
                "cache flush",
                || self.store.write_patch(room, &set, &unset),
                StoreError::is_transient,
            )
            .await;

        match result {
            Ok(()) => {
                entry.state().last_flushed_at = Some(self.clock.now());
                metrics::counter!("roomkeeper_cache_flushes_total", "result" => "ok").increment(1);
                debug!(%room, set = set.len(), unset = unset.len(), "cache flushed");
                Ok(pending.len())
            }
            Err(failure) => {
                {
                    let mut state = entry.state();
                    let EntryState {
                        snapshot, dirty, ..
                    } = &mut *state;
                    dirty.restore(&pending, snapshot);
                }
                metrics::counter!("roomkeeper_cache_flushes_total", "result" => "error")
                    .increment(1);
                warn!(%room, attempts = failure.attempts, error = %failure.error, "cache flush failed");
                Err(CacheError::Store {
                    room: room.clone(),
                    attempts: failure.attempts,
                    source: failure.error,
                })
            }
        }
    }

    /// Flushes every dirty room. Failures are logged and returned; they do
    /// not stop the remaining rooms.
    pub async fn flush_all(&self) -> Vec<(RoomId, CacheError)> {
        let mut failures = Vec::new();
        for room in self.room_ids() {
            if !self.is_dirty(&room) {
                continue;
            }
            if let Err(e) = self.force_flush(&room).await {
                failures.push((room, e));
            }
        }
        failures
    }

    /// Evicts the entry for `room`. Returns whether one existed.
    ///
    /// Unflushed changes are dropped; callers that need them durable flush
    /// first.
    pub fn clear_room(&self, room: &RoomId) -> bool {
        let removed = self.entries.remove(room);
        if let Some((_, entry)) = &removed {
            let dirty = entry.state().dirty.len();
            if dirty > 0 {
                warn!(%room, dirty, "cleared cache entry with unflushed changes");
            } else {
                debug!(%room, "cache entry cleared");
            }
        }
        self.update_gauge();
        removed.is_some()
    }

    /// Returns `true` if `room` has a live entry.
    #[must_use]
    pub fn is_cached(&self, room: &RoomId) -> bool {
        self.entries.contains_key(room)
    }

    /// Returns `true` if `room` has changes not yet flushed.
    #[must_use]
    pub fn is_dirty(&self, room: &RoomId) -> bool {
        self.entries
            .get(room)
            .is_some_and(|entry| !entry.state().dirty.is_empty())
    }

    /// Load and flush timestamps for a cached room.
    #[must_use]
    pub fn info(&self, room: &RoomId) -> Option<CacheInfo> {
        self.entries.get(room).map(|entry| {
            let state = entry.state();
            CacheInfo {
                loaded_at: state.loaded_at,
                last_flushed_at: state.last_flushed_at,
                dirty_paths: state.dirty.len(),
            }
        })
    }

    /// Rooms with a live entry, sorted.
    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Spawns the background flush loop. It runs every `interval` until
    /// `cancel` fires, then performs one last flush of every dirty room.
    pub fn start_flush_task(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let period = interval.max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("flush task cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        cache.flush_all().await;
                    }
                }
            }
            let failures = cache.flush_all().await;
            if failures.is_empty() {
                info!("final cache flush complete");
            } else {
                warn!(failed = failures.len(), "final cache flush left rooms dirty");
            }
        })
    }

    async fn entry(&self, room: &RoomId) -> Result<Arc<CacheEntry>, CacheError> {
        if let Some(entry) = self.entries.get(room) {
            return Ok(Arc::clone(entry.value()));
        }
        self.initialize(room, false).await?;
        // another task may clear the room between load and lookup; reload then
        match self.entries.get(room) {
            Some(entry) => Ok(Arc::clone(entry.value())),
            None => {
                let doc = self.load(room).await?;
                let entry = Arc::new(CacheEntry::new(doc, self.clock.now()));
                Ok(Arc::clone(
                    self.entries.entry(room.clone()).or_insert(entry).value(),
                ))
            }
        }
    }

    async fn load(&self, room: &RoomId) -> Result<Document, CacheError> {
        let found = self
            .retry
            .retry(
                "cache load",
                || self.store.find_one(room),
                StoreError::is_transient,
            )
            .await
            .map_err(|failure| CacheError::Store {
                room: room.clone(),
                attempts: failure.attempts,
                source: failure.error,
            })?;
        Ok(found.unwrap_or_default())
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_gauge(&self) {
        metrics::gauge!("roomkeeper_rooms_cached").set(self.entries.len() as f64);
    }
}

impl std::fmt::Debug for WriteBackCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBackCache")
            .field("rooms", &self.entries.len())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Groups a list of `(path, value)` pairs into a [`FieldPatch`].
#[must_use]
pub fn patch<I, K>(fields: I) -> FieldPatch
where
    I: IntoIterator<Item = (K, serde_json::Value)>,
    K: Into<String>,
{
    fields
        .into_iter()
        .map(|(k, v)| (k.into(), v))
        .collect::<BTreeMap<_, _>>()
}
