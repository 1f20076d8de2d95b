//! Dirty-path bookkeeping for a cached document.
//!
//! Invariant: no tracked path is an ancestor of another tracked path, so the
//! set and unset halves of a flush never overlap and may be applied in any
//! order.

use std::collections::BTreeMap;

use crate::store::path::get_path;
use crate::store::{Document, FieldPatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Set,
    Unset,
}

/// Paths modified since the last successful flush.
#[derive(Debug, Default, Clone)]
pub(crate) struct DirtySet {
    paths: BTreeMap<String, Change>,
}

impl DirtySet {
    pub(crate) fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.paths.len()
    }

    /// Records that `path` now holds a value.
    pub(crate) fn mark_set(&mut self, path: &str) {
        if let Some(ancestor) = self.dirty_ancestor(path) {
            // the ancestor is rewritten whole from the snapshot
            self.paths.insert(ancestor, Change::Set);
            return;
        }
        self.drop_descendants(path);
        self.paths.insert(path.to_string(), Change::Set);
    }

    /// Records that `path` was removed.
    pub(crate) fn mark_unset(&mut self, path: &str) {
        if self.dirty_ancestor(path).is_some() {
            return;
        }
        self.drop_descendants(path);
        self.paths.insert(path.to_string(), Change::Unset);
    }

    /// Moves the tracked paths out, leaving the set empty.
    pub(crate) fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Builds the store patch from the current snapshot. A path marked set
    /// that no longer resolves is sent as an unset.
    pub(crate) fn to_patch(&self, snapshot: &Document) -> (FieldPatch, Vec<String>) {
        let mut set = FieldPatch::new();
        let mut unset = Vec::new();
        for (path, change) in &self.paths {
            match (change, get_path(snapshot, path)) {
                (Change::Set, Some(value)) => {
                    set.insert(path.clone(), value.clone());
                }
                _ => unset.push(path.clone()),
            }
        }
        (set, unset)
    }

    /// Re-marks the paths of a failed flush against the current snapshot.
    pub(crate) fn restore(&mut self, failed: &Self, snapshot: &Document) {
        for path in failed.paths.keys() {
            if get_path(snapshot, path).is_some() {
                self.mark_set(path);
            } else {
                self.mark_unset(path);
            }
        }
    }

    fn dirty_ancestor(&self, path: &str) -> Option<String> {
        path.match_indices('.')
            .map(|(i, _)| &path[..i])
            .find(|prefix| self.paths.contains_key(*prefix))
            .map(str::to_string)
    }

    fn drop_descendants(&mut self, path: &str) {
        let prefix = format!("{path}.");
        self.paths.retain(|p, _| !p.starts_with(&prefix));
    }
}
