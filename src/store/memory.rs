//! In-process store with failure injection.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::StoreError;

use super::{Document, DurableStore, FieldPatch, RoomId, apply_patch};

/// `DashMap`-backed store.
///
/// Besides holding documents, it can delay every call and fail the next N
/// calls, which is how tests exercise retry and rollback paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: DashMap<RoomId, Document>,
    fail_next: AtomicU32,
    latency: Mutex<Option<Duration>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a document directly, bypassing counters and failure injection.
    pub fn insert(&self, room: RoomId, doc: Document) {
        self.docs.insert(room, doc);
    }

    /// Returns a copy of the stored document.
    #[must_use]
    pub fn get(&self, room: &RoomId) -> Option<Document> {
        self.docs.get(room).map(|d| d.value().clone())
    }

    /// Makes the next `n` calls fail with [`StoreError::Unavailable`].
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Delays every subsequent call by `latency`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().expect("latency lock poisoned") = latency;
    }

    /// Number of `find_one` calls that reached the store.
    #[must_use]
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of write calls that reached the store.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<(), StoreError> {
        let latency = self.latency.lock().map(|l| *l).unwrap_or(None);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn find_one(&self, room: &RoomId) -> Result<Option<Document>, StoreError> {
        self.gate().await?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.get(room))
    }

    async fn update_patch(&self, room: &RoomId, patch: &FieldPatch) -> Result<(), StoreError> {
        self.write_patch(room, patch, &[]).await
    }

    async fn unset_fields(&self, room: &RoomId, paths: &[String]) -> Result<(), StoreError> {
        self.write_patch(room, &FieldPatch::new(), paths).await
    }

    async fn room_ids(&self) -> Result<Vec<RoomId>, StoreError> {
        self.gate().await?;
        let mut ids: Vec<RoomId> = self.docs.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }

    async fn write_patch(
        &self,
        room: &RoomId,
        set: &FieldPatch,
        unset: &[String],
    ) -> Result<(), StoreError> {
        self.gate().await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut doc = self.docs.entry(room.clone()).or_default();
        apply_patch(&mut doc, set, unset);
        Ok(())
    }
}
