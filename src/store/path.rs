//! Dotted field-path access on JSON documents.

use serde_json::Value;

use super::Document;

/// Returns `true` if `path` is non-empty and has no empty segments.
#[must_use]
pub fn is_valid(path: &str) -> bool {
    !path.is_empty() && path.split('.').all(|seg| !seg.is_empty())
}

/// Looks up `path` in `doc`.
#[must_use]
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;
    for seg in segments {
        current = current.as_object()?.get(seg)?;
    }
    Some(current)
}

/// Sets `path` to `value`, creating intermediate objects.
///
/// A non-object value sitting on an intermediate segment is replaced by an
/// empty object.
pub fn set_path(doc: &mut Document, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = doc;
    for seg in parents {
        let slot = current
            .entry((*seg).to_string())
            .or_insert_with(|| Value::Object(Document::new()));
        if !slot.is_object() {
            *slot = Value::Object(Document::new());
        }
        let Value::Object(map) = slot else {
            return;
        };
        current = map;
    }
    current.insert((*last).to_string(), value);
}

/// Removes `path`, returning the previous value. Missing paths are a no-op.
pub fn remove_path(doc: &mut Document, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = segments.split_last()?;

    let mut current = doc;
    for seg in parents {
        current = current.get_mut(*seg)?.as_object_mut()?;
    }
    current.remove(*last)
}
