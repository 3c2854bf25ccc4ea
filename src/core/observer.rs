//! Change notification for the data store
//!
//! Observers register a path prefix and receive every written path that
//! overlaps it: writes below the prefix, and writes to any ancestor (which
//! replace the observed subtree).

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

use crate::core::path::Path;

/// A live registration. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    prefix: Path,
    rx: UnboundedReceiver<Path>,
}

impl Subscription {
    /// The prefix this subscription watches
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Wait for the next change notification
    pub async fn changed(&mut self) -> Option<Path> {
        self.rx.recv().await
    }

    /// Take a pending notification without waiting
    pub fn try_changed(&mut self) -> Option<Path> {
        match self.rx.try_recv() {
            Ok(path) => Some(path),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Take every pending notification
    pub fn drain(&mut self) -> Vec<Path> {
        std::iter::from_fn(|| self.try_changed()).collect()
    }
}

struct Observer {
    prefix: Path,
    tx: UnboundedSender<Path>,
}

/// Registry of observers keyed by prefix
#[derive(Default)]
pub struct Observers {
    observers: Vec<Observer>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer for `prefix`
    pub fn subscribe(&mut self, prefix: Path) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(Observer { prefix: prefix.clone(), tx });
        Subscription { prefix, rx }
    }

    /// Signal every observer overlapping `path`; prunes dropped subscriptions.
    /// Returns how many observers were signalled.
    pub fn notify(&mut self, path: &Path) -> usize {
        let mut signalled = 0;
        self.observers.retain(|observer| {
            if observer.tx.is_closed() {
                return false;
            }
            if observer.prefix.overlaps(path) {
                signalled += 1;
                return observer.tx.send(path.clone()).is_ok();
            }
            true
        });
        signalled
    }

    /// Number of live observers
    pub fn len(&self) -> usize {
        self.observers.iter().filter(|o| !o.tx.is_closed()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every registration
    pub fn clear(&mut self) {
        self.observers.clear();
    }
}
