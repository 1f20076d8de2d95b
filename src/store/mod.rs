//! Durable store interface
//!
//! The engine treats each room's persisted state as an opaque JSON object
//! addressed by dotted field paths. Only the write-back cache talks to a
//! [`DurableStore`]; everything else goes through the cache.
//!
//! # Implementations
//!
//! - [`MemoryStore`]: in-process map with failure injection, for tests
//! - [`JsonFileStore`]: single JSON file replaced atomically on each write

pub mod file;
pub mod memory;
pub mod path;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// A room's persisted document.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Field-path → value patch. Paths are dot-separated.
pub type FieldPatch = BTreeMap<String, serde_json::Value>;

/// Opaque external room identifier.
///
/// Every coordination structure is keyed by room, and rooms never share
/// state with each other.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    /// Creates a new `RoomId` from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Durable per-room document store.
///
/// Single-document patches are assumed to be applied atomically by the
/// store; no multi-document transactions are required.
#[async_trait]
pub trait DurableStore: Send + Sync + std::fmt::Debug {
    /// Fetches the document for `room`, or `None` if it has never been written.
    async fn find_one(&self, room: &RoomId) -> Result<Option<Document>, StoreError>;

    /// Sets each path in `patch`, creating the document if needed.
    async fn update_patch(&self, room: &RoomId, patch: &FieldPatch) -> Result<(), StoreError>;

    /// Removes each path in `paths`. Missing paths are ignored.
    async fn unset_fields(&self, room: &RoomId, paths: &[String]) -> Result<(), StoreError>;

    /// Lists every room with a stored document.
    async fn room_ids(&self) -> Result<Vec<RoomId>, StoreError>;

    /// Applies sets and unsets together.
    ///
    /// The default issues the two calls in sequence; stores that can apply
    /// both in one operation should override this.
    async fn write_patch(
        &self,
        room: &RoomId,
        set: &FieldPatch,
        unset: &[String],
    ) -> Result<(), StoreError> {
        if !set.is_empty() {
            self.update_patch(room, set).await?;
        }
        if !unset.is_empty() {
            self.unset_fields(room, unset).await?;
        }
        Ok(())
    }
}

/// Applies a set/unset pair to an in-memory document.
pub(crate) fn apply_patch(doc: &mut Document, set: &FieldPatch, unset: &[String]) {
    for (field, value) in set {
        path::set_path(doc, field, value.clone());
    }
    for field in unset {
        path::remove_path(doc, field);
    }
}
