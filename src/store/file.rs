//! Single-file JSON store used by the CLI.
//!
//! The whole file is a `{ roomId: document }` object. Each write rewrites a
//! sibling temp file and renames it over the original, so a crash leaves
//! either the old or the new contents.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;

use super::{Document, DurableStore, FieldPatch, RoomId, apply_patch};

/// JSON file store.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    docs: Mutex<BTreeMap<RoomId, Document>>,
}

impl JsonFileStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let docs = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "store file not found; starting empty");
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            docs: Mutex::new(docs),
        })
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, docs: &BTreeMap<RoomId, Document>) -> Result<(), StoreError> {
        let raw = serde_json::to_vec_pretty(docs)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl DurableStore for JsonFileStore {
    async fn find_one(&self, room: &RoomId) -> Result<Option<Document>, StoreError> {
        Ok(self.docs.lock().await.get(room).cloned())
    }

    async fn update_patch(&self, room: &RoomId, patch: &FieldPatch) -> Result<(), StoreError> {
        self.write_patch(room, patch, &[]).await
    }

    async fn unset_fields(&self, room: &RoomId, paths: &[String]) -> Result<(), StoreError> {
        self.write_patch(room, &FieldPatch::new(), paths).await
    }

    async fn room_ids(&self) -> Result<Vec<RoomId>, StoreError> {
        Ok(self.docs.lock().await.keys().cloned().collect())
    }

    async fn write_patch(
        &self,
        room: &RoomId,
        set: &FieldPatch,
        unset: &[String],
    ) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().await;
        let mut next = docs.get(room).cloned().unwrap_or_default();
        apply_patch(&mut next, set, unset);

        let previous = docs.insert(room.clone(), next);
        if let Err(e) = self.persist(&docs).await {
            // keep memory consistent with the file
            match previous {
                Some(prev) => docs.insert(room.clone(), prev),
                None => docs.remove(room),
            };
            return Err(e);
        }
        drop(docs);
        Ok(())
    }
}
