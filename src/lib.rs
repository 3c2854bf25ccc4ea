//! datastore: client-side application state with fetch caching and
//! draft/publish CRUD synchronisation
//!
//! All state lives in one tree addressed by paths. Server fetches are cached
//! and de-duplicated per path, and the CRUD orchestrator keeps local edits,
//! edit status and cached lists consistent with the server.

pub mod cache;
pub mod config;
pub mod core;
pub mod crud;
pub mod data;
pub mod io;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::core::observer::Observers;
use crate::core::store::Store;
use crate::data::entity::{HasId, HasType};
use crate::data::paths::entity_path;
use crate::storage::MemoryStore;

/// The shared application state: a path-addressed tree plus its observers.
///
/// Inject one instance (usually behind an `Arc`) into every component that
/// reads or writes state. Values handed out are copies; to change state,
/// write it back through `set`.
pub struct DataStore {
    store: Mutex<Box<dyn Store>>,
    observers: Mutex<Observers>,
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new_in_memory()
    }
}

impl DataStore {
    /// Create a new in-memory state tree
    pub fn new_in_memory() -> Self {
        Self::from_store(Box::new(MemoryStore::new()))
    }

    /// Wrap an existing backend
    pub fn from_store(store: Box<dyn Store>) -> Self {
        DataStore {
            store: Mutex::new(store),
            observers: Mutex::new(Observers::new()),
        }
    }

    fn backend(&self) -> MutexGuard<'_, Box<dyn Store>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, path: &Path) {
        let signalled = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .notify(path);
        if signalled > 0 {
            log::trace!("store: {} observer(s) signalled for {}", signalled, path);
        }
    }

    /// Get a copy of the value at the given path; None if absent
    pub fn get(&self, path: &Path) -> Result<Option<Value>> {
        self.backend().get(path)
    }

    /// Set a value at the given path and notify observers
    pub fn set(&self, path: Path, value: Value) -> Result<()> {
        self.backend().set(&path, value)?;
        self.notify(&path);
        Ok(())
    }

    /// Set a value without notifying anyone. For housekeeping writes the UI
    /// need not react to.
    pub fn set_silently(&self, path: Path, value: Value) -> Result<()> {
        self.backend().set(&path, value)
    }

    /// Deep-merge a value into the given path and notify observers
    pub fn merge(&self, path: Path, value: Value) -> Result<()> {
        self.backend().merge(&path, value)?;
        self.notify(&path);
        Ok(())
    }

    /// Delete the subtree at the given path, returning it
    pub fn delete(&self, path: &Path) -> Result<Option<Value>> {
        let removed = self.backend().delete(path)?;
        if removed.is_some() {
            self.notify(path);
        }
        Ok(removed)
    }

    /// Check if a path holds a value
    pub fn exists(&self, path: &Path) -> Result<bool> {
        self.backend().exists(path)
    }

    /// Child keys of the mapping at the given path
    pub fn keys(&self, path: &Path) -> Result<Vec<String>> {
        self.backend().keys(path)
    }

    /// Deep copy of the whole tree
    pub fn snapshot(&self) -> Value {
        self.backend().snapshot()
    }

    /// Watch a path prefix for changes
    pub fn subscribe(&self, prefix: Path) -> Subscription {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe(prefix)
    }

    /// Signal every observer without writing anything
    pub fn update(&self) {
        self.notify(&Path::new());
    }

    /// Drop all state and all observers
    pub fn clear(&self) {
        self.backend().clear();
        self.observers.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// The stored copy of an entity
    pub fn get_data(&self, status: KStatus, type_tag: &str, id: &str) -> Result<Option<Value>> {
        self.get(&entity_path(status, type_tag, id))
    }

    /// Store an entity under its own id and type
    pub fn set_data(&self, status: KStatus, item: Value) -> Result<Path> {
        let path = self.get_data_path(status, &item)?;
        self.set(path.clone(), item)?;
        Ok(path)
    }

    /// Where an entity would be stored
    pub fn get_data_path(&self, status: KStatus, item: &Value) -> Result<Path> {
        if status.is_composite() {
            return Err(StoreError::Validation(format!("{} is not a storage status", status)));
        }
        let id = item
            .id()
            .ok_or_else(|| StoreError::Validation("item has no id".to_string()))?;
        let type_tag = item
            .type_tag()
            .ok_or_else(|| StoreError::Validation(format!("item {} has no type", id)))?;
        Ok(entity_path(status, type_tag, id))
    }
}

pub use crate::cache::{FetchCache, FetchHandle, FetchState, ListCache};
pub use crate::config::{ConfigError, CoreConfig};
pub use crate::core::errors::{CrudError, CrudResult, Result, StoreError};
pub use crate::core::observer::Subscription;
pub use crate::core::path::{Path, Segment};
pub use crate::crud::{CrudOrchestrator, CrudOutcome, EditStatus, EditStatusTracker};
pub use crate::data::status::{CrudAction, KStatus};
pub use crate::io::{Envelope, Messenger, Session, Transport};
