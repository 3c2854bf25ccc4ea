//! Entity capabilities for the data store
//!
//! Domain records are plain JSON values. Identity and type tags are read
//! through the `HasId`/`HasType` capabilities rather than a class hierarchy,
//! and `Kind` classifies a value once so callers match exhaustively.

use serde_json::{Map, Value};

/// The placeholder id of an item the server has not minted an id for yet
pub const NEW_ID: &str = "new";

/// Something with an identifier
pub trait HasId {
    fn id(&self) -> Option<&str>;
}

/// Something with a type tag
pub trait HasType {
    fn type_tag(&self) -> Option<&str>;
}

impl HasId for Value {
    /// Prefers a plain `id`, then `@id`, then `xid`. Array ids use the first entry.
    fn id(&self) -> Option<&str> {
        let map = self.as_object()?;
        ["id", "@id", "xid"]
            .iter()
            .filter_map(|key| map.get(*key))
            .find_map(|raw| match raw {
                Value::String(s) if !s.is_empty() => Some(s.as_str()),
                Value::Array(ids) => ids.first().and_then(Value::as_str),
                _ => None,
            })
    }
}

impl HasType for Value {
    /// `@type`, or the simple class name of a `@class`
    fn type_tag(&self) -> Option<&str> {
        let map = self.as_object()?;
        if let Some(tag) = map.get("@type").and_then(Value::as_str) {
            return Some(tag);
        }
        let class = map.get("@class").and_then(Value::as_str)?;
        Some(class.rsplit('.').next().unwrap_or(class))
    }
}

/// Shape of a stored value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Kind<'a> {
    /// A mapping with both an id and a type tag
    Entity { id: &'a str, type_tag: &'a str },
    /// A `{hits: [...], total}` list result
    List { hits: &'a [Value] },
    /// Any other mapping
    Object(&'a Map<String, Value>),
    Array(&'a [Value]),
    Scalar,
}

impl<'a> Kind<'a> {
    pub fn of(value: &'a Value) -> Kind<'a> {
        match value {
            Value::Object(map) => {
                if let Some(Value::Array(hits)) = map.get("hits") {
                    return Kind::List { hits };
                }
                match (value.id(), value.type_tag()) {
                    (Some(id), Some(type_tag)) => Kind::Entity { id, type_tag },
                    _ => Kind::Object(map),
                }
            }
            Value::Array(items) => Kind::Array(items),
            _ => Kind::Scalar,
        }
    }
}

/// Stamp the type tag onto an item that lacks one
pub fn ensure_type(item: &mut Value, type_tag: &str) {
    if item.type_tag().is_none() {
        if let Value::Object(map) = item {
            map.insert("@type".to_string(), Value::String(type_tag.to_string()));
        }
    }
}

/// Set the `id` field
pub fn set_id(item: &mut Value, id: &str) {
    if let Value::Object(map) = item {
        map.insert("id".to_string(), Value::String(id.to_string()));
    }
}

/// Human-facing title of an item
pub fn name(item: &Value) -> Option<&str> {
    item.get("name").and_then(Value::as_str)
}
