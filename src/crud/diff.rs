//! Structural diffs between two snapshots of an entity

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::path::{Path, Segment};
use crate::core::value::{remove_in, set_in};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Add,
    Remove,
    Replace,
}

/// One structural edit, relative to the entity root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edit {
    pub op: Op,
    pub path: Path,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Edit {
    fn add(path: Path, value: &Value) -> Self {
        Edit { op: Op::Add, path, value: Some(value.clone()) }
    }

    fn remove(path: Path) -> Self {
        Edit { op: Op::Remove, path, value: None }
    }

    fn replace(path: Path, value: &Value) -> Self {
        Edit { op: Op::Replace, path, value: Some(value.clone()) }
    }
}

/// Edits turning `before` into `after`. Empty when they are equal.
///
/// Mappings are compared key by key. Arrays of equal length are compared
/// element-wise; an array that changed length is replaced whole.
pub fn diff(before: &Value, after: &Value) -> Vec<Edit> {
    let mut edits = Vec::new();
    diff_at(&mut Path::new(), before, after, &mut edits);
    edits
}

fn diff_at(path: &mut Path, before: &Value, after: &Value, edits: &mut Vec<Edit>) {
    if before == after {
        return;
    }
    match (before, after) {
        (Value::Object(old), Value::Object(new)) => {
            for key in old.keys().filter(|key| !new.contains_key(*key)) {
                edits.push(Edit::remove(path.child(key.as_str())));
            }
            for (key, value) in new {
                match old.get(key) {
                    Some(previous) => {
                        path.push(key.as_str());
                        diff_at(path, previous, value, edits);
                        path.pop();
                    }
                    None => edits.push(Edit::add(path.child(key.as_str()), value)),
                }
            }
        }
        (Value::Array(old), Value::Array(new)) if old.len() == new.len() => {
            for (idx, (previous, value)) in old.iter().zip(new).enumerate() {
                path.push(Segment::Index(idx));
                diff_at(path, previous, value, edits);
                path.pop();
            }
        }
        _ => edits.push(Edit::replace(path.clone(), after)),
    }
}

/// Apply `edits` to `target` in order
pub fn apply(target: &mut Value, edits: &[Edit]) -> crate::Result<()> {
    for edit in edits {
        match (edit.op, &edit.value) {
            (Op::Remove, _) => {
                remove_in(target, edit.path.segments())?;
            }
            (Op::Add | Op::Replace, Some(value)) => {
                set_in(target, edit.path.segments(), value.clone())?;
            }
            (Op::Add | Op::Replace, None) => {
                set_in(target, edit.path.segments(), Value::Null)?;
            }
        }
    }
    Ok(())
}
