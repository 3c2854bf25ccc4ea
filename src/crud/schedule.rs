//! Trailing-edge debouncing of server actions
//!
//! Bursts of calls for the same key collapse into one invocation that runs
//! once the key has been quiet for the configured delay. Pending work can be
//! cancelled; work that has already started always runs to completion.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Statistics for the debouncer
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DebounceStats {
    /// Calls to `schedule`
    pub scheduled: usize,
    /// Tasks that ran
    pub fired: usize,
    /// Tasks replaced by a later call before they ran
    pub superseded: usize,
    /// Tasks dropped by `cancel`
    pub cancelled: usize,
}

struct Slot {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Inner<K> {
    slots: HashMap<K, Slot>,
    generation: u64,
    stats: DebounceStats,
}

/// Per-key trailing debouncer running on the tokio runtime
pub struct Debouncer<K> {
    delay: Duration,
    inner: Arc<Mutex<Inner<K>>>,
}

impl<K> Clone for Debouncer<K> {
    fn clone(&self) -> Self {
        Debouncer { delay: self.delay, inner: self.inner.clone() }
    }
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(delay: Duration) -> Self {
        Debouncer {
            delay,
            inner: Arc::new(Mutex::new(Inner {
                slots: HashMap::new(),
                generation: 0,
                stats: DebounceStats::default(),
            })),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `task` after the delay unless `key` is scheduled again first
    pub fn schedule<F, Fut>(&self, key: K, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.stats.scheduled += 1;
        let generation = inner.generation;

        let shared = self.inner.clone();
        let delay = self.delay;
        let slot_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut inner = shared.lock().unwrap_or_else(PoisonError::into_inner);
                match inner.slots.get(&slot_key) {
                    Some(slot) if slot.generation == generation => {
                        inner.slots.remove(&slot_key);
                        inner.stats.fired += 1;
                    }
                    _ => return,
                }
            }
            task().await;
        });

        if let Some(previous) = inner.slots.insert(key, Slot { generation, handle }) {
            previous.handle.abort();
            inner.stats.superseded += 1;
        }
    }

    /// Drop the pending task for `key`. Returns false if nothing was pending.
    pub fn cancel(&self, key: &K) -> bool {
        let mut inner = self.lock();
        match inner.slots.remove(key) {
            Some(slot) => {
                slot.handle.abort();
                inner.stats.cancelled += 1;
                true
            }
            None => false,
        }
    }

    /// Drop every pending task matching `filter`; returns how many went
    pub fn cancel_where(&self, filter: impl Fn(&K) -> bool) -> usize {
        let mut inner = self.lock();
        let doomed: Vec<K> = inner.slots.keys().filter(|key| filter(key)).cloned().collect();
        for key in &doomed {
            if let Some(slot) = inner.slots.remove(key) {
                slot.handle.abort();
            }
        }
        inner.stats.cancelled += doomed.len();
        doomed.len()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.lock().slots.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn stats(&self) -> DebounceStats {
        self.lock().stats.clone()
    }
}
