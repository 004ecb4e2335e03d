//! Dotted field paths over the JSON form of a [`DocumentState`].
//!
//! `content.hero.headline` addresses `doc.content["hero"]["headline"]`.
//! Arrays are addressed as a whole; there is no index syntax.
//!
//! [`DocumentState`]: crate::DocumentState

use serde_json::{Map, Value};

use crate::document::ValidationError;

pub fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// Read the value at `path`, if every segment exists.
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    path.split('.')
        .try_fold(root, |node, segment| node.as_object()?.get(segment))
}

/// Write `value` at `path`, creating intermediate objects as needed.
/// `Value::Null` removes the key.
pub fn set(root: &mut Value, path: &str, value: Value) -> Result<(), ValidationError> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(ValidationError::InvalidPath(path.to_string()));
    }
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| ValidationError::InvalidPath(path.to_string()))?;

    let mut node = root;
    for segment in parents {
        let map = node
            .as_object_mut()
            .ok_or_else(|| ValidationError::InvalidPath(path.to_string()))?;
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let map = node
        .as_object_mut()
        .ok_or_else(|| ValidationError::InvalidPath(path.to_string()))?;
    if value.is_null() {
        map.remove(*last);
    } else {
        map.insert(last.to_string(), value);
    }
    Ok(())
}
