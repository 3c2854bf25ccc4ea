//! Fetch cache
//!
//! Wraps store entries with a pending/resolved/error handle keyed by path.
//! A resolved value lives in the store itself; a pending load is shared by
//! every caller asking for the same path until it settles, so each path has
//! at most one loader in flight.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;

use crate::core::path::Path;
use crate::io::{sanitize_message, Envelope, Messenger, TransportError};
use crate::DataStore;

/// Why a fetch produced no value
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("{message}")]
    Server { message: String, code: Option<String> },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Fetch abandoned before it settled")]
    Abandoned,
}

/// Lifecycle of one fetch
#[derive(Debug, Clone, PartialEq)]
pub enum FetchState {
    Pending,
    Resolved(Value),
    Failed(FetchError),
}

impl FetchState {
    pub fn is_pending(&self) -> bool {
        matches!(self, FetchState::Pending)
    }
}

/// Shared view of one fetch. Cloning yields another view of the same fetch.
#[derive(Clone)]
pub struct FetchHandle {
    state: Arc<watch::Sender<FetchState>>,
}

impl std::fmt::Debug for FetchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchHandle").field("state", &*self.state.borrow()).finish()
    }
}

impl FetchHandle {
    fn pending() -> Self {
        let (tx, _rx) = watch::channel(FetchState::Pending);
        FetchHandle { state: Arc::new(tx) }
    }

    /// A handle that is already settled with `value`
    pub fn resolved(value: Value) -> Self {
        let (tx, _rx) = watch::channel(FetchState::Resolved(value));
        FetchHandle { state: Arc::new(tx) }
    }

    /// A handle that is already settled with `error`
    pub fn failed(error: FetchError) -> Self {
        let (tx, _rx) = watch::channel(FetchState::Failed(error));
        FetchHandle { state: Arc::new(tx) }
    }

    fn settle(&self, state: FetchState) {
        self.state.send_replace(state);
    }

    pub fn state(&self) -> FetchState {
        self.state.borrow().clone()
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.state.borrow(), FetchState::Resolved(_))
    }

    pub fn is_pending(&self) -> bool {
        self.state.borrow().is_pending()
    }

    pub fn value(&self) -> Option<Value> {
        match &*self.state.borrow() {
            FetchState::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<FetchError> {
        match &*self.state.borrow() {
            FetchState::Failed(error) => Some(error.clone()),
            _ => None,
        }
    }

    /// True when both handles view the same fetch
    pub fn same_as(&self, other: &FetchHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Wait for the fetch to settle
    pub async fn wait(&self) -> Result<Value, FetchError> {
        let mut rx = self.state.subscribe();
        let settled = rx
            .wait_for(|state| !state.is_pending())
            .await
            .map_err(|_| FetchError::Abandoned)?;
        match &*settled {
            FetchState::Resolved(value) => Ok(value.clone()),
            FetchState::Failed(error) => Err(error.clone()),
            FetchState::Pending => Err(FetchError::Abandoned),
        }
    }
}

/// Path-keyed cache of server fetches
#[derive(Clone)]
pub struct FetchCache {
    store: Arc<DataStore>,
    messenger: Arc<dyn Messenger>,
    pending: Arc<Mutex<HashMap<Path, FetchHandle>>>,
}

impl FetchCache {
    pub fn new(store: Arc<DataStore>, messenger: Arc<dyn Messenger>) -> Self {
        FetchCache {
            store,
            messenger,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn pending_map(&self) -> MutexGuard<'_, HashMap<Path, FetchHandle>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the value at `path`, loading it with `loader` if nothing is cached
    /// or in flight.
    ///
    /// With `required`, a failure is also reported to the user; otherwise the
    /// caller has to check the handle's error. Must be called from within a
    /// tokio runtime.
    pub fn fetch<F, Fut>(&self, path: Path, loader: F, required: bool) -> FetchHandle
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Envelope, TransportError>> + Send + 'static,
    {
        self.fetch_checked(path, loader, required, |_| true)
    }

    /// Like `fetch`, but a stored value only counts as a cache hit when
    /// `is_hit` accepts it. Anything else is loaded again and overwritten.
    pub fn fetch_checked<F, Fut>(
        &self,
        path: Path,
        loader: F,
        required: bool,
        is_hit: impl Fn(&Value) -> bool,
    ) -> FetchHandle
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Envelope, TransportError>> + Send + 'static,
    {
        let handle = {
            let mut pending = self.pending_map();

            match self.store.get(&path) {
                Ok(Some(value)) if is_hit(&value) => {
                    log::debug!("fetch: cache hit {}", path);
                    return FetchHandle::resolved(value);
                }
                Ok(Some(_)) => {
                    log::debug!("fetch: ignoring misshapen value at {}", path);
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("fetch: cannot read {}: {}", path, e);
                }
            }

            if let Some(existing) = pending.get(&path) {
                log::debug!("fetch: joining in-flight load of {}", path);
                return existing.clone();
            }

            let handle = FetchHandle::pending();
            pending.insert(path.clone(), handle.clone());
            handle
        };

        log::debug!("fetch: loading {}", path);
        let request = loader();
        let cache = self.clone();
        let task_handle = handle.clone();
        tokio::spawn(async move {
            let outcome = request.await;
            cache.complete(path, task_handle, outcome, required);
        });

        handle
    }

    fn complete(
        &self,
        path: Path,
        handle: FetchHandle,
        outcome: Result<Envelope, TransportError>,
        required: bool,
    ) {
        let result = outcome
            .map_err(FetchError::from)
            .and_then(|envelope| {
                envelope.into_cargo().map_err(|failure| FetchError::Server {
                    message: failure.message,
                    code: failure.code,
                })
            });

        // last writer wins: a load superseded by invalidation still lands
        let state = match result {
            Ok(cargo) => match self.store.set(path.clone(), cargo.clone()) {
                Ok(()) => FetchState::Resolved(cargo),
                Err(e) => FetchState::Failed(FetchError::Server { message: e.to_string(), code: None }),
            },
            Err(error) => {
                log::warn!("fetch: {} failed: {}", path, error);
                if required {
                    self.messenger.notify_user(&sanitize_message(&error.to_string()));
                }
                FetchState::Failed(error)
            }
        };

        {
            let mut pending = self.pending_map();
            if pending.get(&path).is_some_and(|current| current.same_as(&handle)) {
                pending.remove(&path);
            }
        }
        handle.settle(state);
    }

    /// The in-flight handle for `path`, if any
    pub fn in_flight(&self, path: &Path) -> Option<FetchHandle> {
        self.pending_map().get(path).cloned()
    }

    /// Forget every cached value and in-flight handle at or below `prefix`,
    /// so the next fetch goes back to the server
    pub fn invalidate_prefix(&self, prefix: &Path) -> crate::Result<()> {
        self.pending_map().retain(|path, _| !path.starts_with(prefix));
        self.store.delete(prefix)?;
        Ok(())
    }
}
