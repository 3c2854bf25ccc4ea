//! In-memory store
//!
//! This module provides the in-memory implementation of the state tree:
//! a single nested JSON mapping addressed by paths.

use serde_json::{Map, Value};
use crate::core::path::Path;
use crate::core::value::{get_in, merge_into, remove_in, set_in};
use crate::core::errors::{Result, StoreError};
use crate::core::store::Store;

/// An in-memory state tree
#[derive(Debug)]
pub struct MemoryStore {
    /// Root mapping
    root: Value,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        MemoryStore {
            root: Value::Object(Map::new()),
        }
    }
}

impl Store for MemoryStore {
    fn get(&self, path: &Path) -> Result<Option<Value>> {
        if path.is_empty() {
            return Err(StoreError::InvalidOperation("Cannot get value at empty path".to_string()));
        }

        Ok(get_in(&self.root, path.segments())?.filter(|v| !v.is_null()).cloned())
    }

    fn set(&mut self, path: &Path, value: Value) -> Result<()> {
        if path.is_empty() {
            return Err(StoreError::InvalidOperation("Cannot set value at empty path".to_string()));
        }

        set_in(&mut self.root, path.segments(), value)
    }

    fn merge(&mut self, path: &Path, value: Value) -> Result<()> {
        if path.is_empty() {
            return Err(StoreError::InvalidOperation("Cannot merge value at empty path".to_string()));
        }

        match get_in(&self.root, path.segments())? {
            Some(existing) if !existing.is_null() => {
                let mut merged = existing.clone();
                merge_into(&mut merged, value);
                set_in(&mut self.root, path.segments(), merged)
            }
            _ => set_in(&mut self.root, path.segments(), value),
        }
    }

    fn delete(&mut self, path: &Path) -> Result<Option<Value>> {
        if path.is_empty() {
            return Err(StoreError::InvalidOperation("Cannot delete value at empty path".to_string()));
        }

        remove_in(&mut self.root, path.segments())
    }

    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.get(path)?.is_some())
    }

    fn keys(&self, path: &Path) -> Result<Vec<String>> {
        let node = if path.is_empty() {
            Some(&self.root)
        } else {
            get_in(&self.root, path.segments())?
        };
        Ok(match node {
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        })
    }

    fn snapshot(&self) -> Value {
        self.root.clone()
    }

    fn clear(&mut self) {
        self.root = Value::Object(Map::new());
    }
}
