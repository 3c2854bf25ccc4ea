//! Value helpers for the data store
//!
//! Store nodes are plain JSON values. This module holds the tree walking
//! primitives the backends and the diff engine share.

use serde_json::{Map, Value};
use super::errors::{Result, StoreError};
use super::path::{Path, Segment};

/// Get a string representation of the value's type
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn not_a_container(segments: &[Segment], depth: usize, found: &Value) -> StoreError {
    StoreError::NotAContainer {
        path: Path::from_segments(segments[..=depth].to_vec()),
        found: type_name(found),
    }
}

/// Look up the node at `segments` below `root`.
///
/// Missing keys, out-of-range indexes and nulls along the way read as absent.
/// Indexing into a scalar is an error.
pub fn get_in<'a>(root: &'a Value, segments: &[Segment]) -> Result<Option<&'a Value>> {
    let mut node = root;
    for (depth, segment) in segments.iter().enumerate() {
        let next = match node {
            Value::Null => return Ok(None),
            Value::Object(map) => map.get(&segment.as_key()),
            Value::Array(items) => match segment.as_index() {
                Some(idx) => items.get(idx),
                None => return Err(not_a_container(segments, depth, node)),
            },
            scalar => return Err(not_a_container(segments, depth, scalar)),
        };
        match next {
            Some(child) => node = child,
            None => return Ok(None),
        }
    }
    Ok(Some(node))
}

/// Walk to the container holding the last segment, creating empty mappings
/// for absent or null intermediates.
fn container_for<'a>(root: &'a mut Value, segments: &[Segment]) -> Result<&'a mut Value> {
    let mut node = root;
    for (depth, segment) in segments[..segments.len() - 1].iter().enumerate() {
        if node.is_null() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map
                .entry(segment.as_key())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => {
                let idx = segment
                    .as_index()
                    .ok_or_else(|| StoreError::NotAContainer {
                        path: Path::from_segments(segments[..=depth].to_vec()),
                        found: "array",
                    })?;
                if idx >= items.len() {
                    items.resize(idx + 1, Value::Null);
                }
                &mut items[idx]
            }
            scalar => return Err(not_a_container(segments, depth, scalar)),
        };
    }
    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    Ok(node)
}

/// Replace the node at `segments`, creating intermediate mappings lazily.
pub fn set_in(root: &mut Value, segments: &[Segment], value: Value) -> Result<()> {
    let Some(last) = segments.last() else {
        *root = value;
        return Ok(());
    };
    let depth = segments.len() - 1;
    let container = container_for(root, segments)?;
    match container {
        Value::Object(map) => {
            map.insert(last.as_key(), value);
        }
        Value::Array(items) => {
            let idx = last.as_index().ok_or_else(|| StoreError::NotAContainer {
                path: Path::from_segments(segments.to_vec()),
                found: "array",
            })?;
            if idx >= items.len() {
                items.resize(idx + 1, Value::Null);
            }
            items[idx] = value;
        }
        scalar => return Err(not_a_container(segments, depth, scalar)),
    }
    Ok(())
}

/// Remove the node at `segments`, returning it. Array elements are taken out,
/// shifting later elements down.
pub fn remove_in(root: &mut Value, segments: &[Segment]) -> Result<Option<Value>> {
    let Some((last, parent)) = segments.split_last() else {
        return Ok(Some(std::mem::replace(root, Value::Null)));
    };
    let mut node = root;
    for (depth, segment) in parent.iter().enumerate() {
        let next = match node {
            Value::Null => None,
            Value::Object(map) => map.get_mut(&segment.as_key()),
            Value::Array(items) => match segment.as_index() {
                Some(idx) => items.get_mut(idx),
                None => {
                    return Err(StoreError::NotAContainer {
                        path: Path::from_segments(segments[..=depth].to_vec()),
                        found: "array",
                    })
                }
            },
            scalar => return Err(not_a_container(segments, depth, scalar)),
        };
        match next {
            Some(child) => node = child,
            None => return Ok(None),
        }
    }
    match node {
        Value::Object(map) => Ok(map.remove(&last.as_key())),
        Value::Array(items) => match last.as_index() {
            Some(idx) if idx < items.len() => Ok(Some(items.remove(idx))),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

/// Deep-merge `patch` into `target`: mappings merge key by key, anything
/// else replaces.
pub fn merge_into(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) => merge_into(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
