use serde_json::Value;

use crate::core::path::Path;
use crate::core::errors::Result;

/// Trait defining the core operations of a state tree backend
pub trait Store: Send {
    /// Get a copy of the value at the given path, None if absent
    fn get(&self, path: &Path) -> Result<Option<Value>>;

    /// Replace the value at the given path
    fn set(&mut self, path: &Path, value: Value) -> Result<()>;

    /// Deep-merge a value into whatever is at the given path
    fn merge(&mut self, path: &Path, value: Value) -> Result<()>;

    /// Remove the subtree at the given path, returning it
    fn delete(&mut self, path: &Path) -> Result<Option<Value>>;

    /// Check if a path holds a value
    fn exists(&self, path: &Path) -> Result<bool>;

    /// Child keys of the mapping at the given path
    fn keys(&self, path: &Path) -> Result<Vec<String>>;

    /// Deep copy of the whole tree
    fn snapshot(&self) -> Value;

    /// Drop all state
    fn clear(&mut self);
}
