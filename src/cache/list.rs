//! Cached list views and their optimistic patches

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::core::path::Path;
use crate::data::entity::HasId;
use crate::data::list::{List, ListNode};
use crate::data::paths::{list_path, list_root, list_status_root, ListQuery};
use crate::data::status::{KStatus, ListEffect};
use crate::io::{Envelope, TransportError};
use crate::DataStore;

use super::fetch::{FetchCache, FetchHandle};

/// Lists of entities, stored under `list.{type}` and loaded through the
/// fetch cache
#[derive(Clone)]
pub struct ListCache {
    store: Arc<DataStore>,
    fetches: FetchCache,
}

impl ListCache {
    pub fn new(store: Arc<DataStore>, fetches: FetchCache) -> Self {
        ListCache { store, fetches }
    }

    pub fn path(&self, type_tag: &str, status: KStatus, query: &ListQuery) -> Path {
        list_path(type_tag, status, query)
    }

    /// Load a list into its slot, sharing any load already in flight
    pub fn load<F, Fut>(
        &self,
        type_tag: &str,
        status: KStatus,
        query: &ListQuery,
        loader: F,
        required: bool,
    ) -> FetchHandle
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Envelope, TransportError>> + Send + 'static,
    {
        self.fetches.fetch_checked(list_path(type_tag, status, query), loader, required, |value| {
            List::from_value(value).is_some()
        })
    }

    /// The cached list in a slot, if one is there
    pub fn get(&self, type_tag: &str, status: KStatus, query: &ListQuery) -> crate::Result<Option<List>> {
        let value = self.store.get(&list_path(type_tag, status, query))?;
        Ok(value.as_ref().and_then(List::from_value))
    }

    /// Drop every cached list of a type
    pub fn invalidate(&self, type_tag: &str) -> crate::Result<()> {
        log::debug!("lists: invalidating {}", type_tag);
        self.fetches.invalidate_prefix(&list_root(type_tag))
    }

    /// Patch the cached lists of a type for an action's outcome
    pub fn apply(&self, effect: ListEffect, type_tag: &str, item: &Value) -> crate::Result<()> {
        match (effect, item.id()) {
            (ListEffect::Promote { into, remove_from }, Some(_)) => {
                self.promote(type_tag, item, into, remove_from).map(|_| ())
            }
            (ListEffect::Demote { from }, Some(id)) => self.demote(type_tag, id, from).map(|_| ()),
            (ListEffect::RemoveEverywhere, Some(id)) => self.remove_everywhere(type_tag, id).map(|_| ()),
            _ => self.invalidate(type_tag),
        }
    }

    /// Put `item` at the front of the unfiltered `into` lists that are
    /// cached, after taking it out of the `remove_from` lists. Every other
    /// list of the type is invalidated. Returns how many lists were patched.
    pub fn promote(
        &self,
        type_tag: &str,
        item: &Value,
        into: &[KStatus],
        remove_from: &[KStatus],
    ) -> crate::Result<usize> {
        let unfiltered = ListQuery::new();
        let mut patched = Vec::new();

        for &status in remove_from {
            let root = list_status_root(type_tag, status);
            if let Some(value) = self.store.get(&root)? {
                let mut node = ListNode::from_value(&value);
                if let Some(id) = item.id() {
                    node.remove_id(id);
                }
                patched.push((root, node.into_value()));
            }
        }

        for &status in into {
            let path = list_path(type_tag, status, &unfiltered);
            if let Some(mut list) = self.store.get(&path)?.as_ref().and_then(List::from_value) {
                list.insert_front(item.clone());
                patched.push((path, list.to_value()));
            }
        }

        self.invalidate(type_tag)?;
        let count = patched.len();
        for (path, value) in patched {
            self.store.set(path, value)?;
        }
        log::debug!("lists: promoted {:?} in {} {} list(s)", item.id(), count, type_tag);
        Ok(count)
    }

    /// Take `id` out of every `from` list, at any depth, and invalidate the
    /// rest of the type's lists. Returns how many references went.
    pub fn demote(&self, type_tag: &str, id: &str, from: &[KStatus]) -> crate::Result<usize> {
        let mut removed = 0;
        let mut patched = Vec::new();

        for &status in from {
            let root = list_status_root(type_tag, status);
            if let Some(value) = self.store.get(&root)? {
                let mut node = ListNode::from_value(&value);
                removed += node.remove_id(id);
                patched.push((root, node.into_value()));
            }
        }

        self.invalidate(type_tag)?;
        for (path, value) in patched {
            self.store.set(path, value)?;
        }
        log::debug!("lists: demoted {} ({} reference(s))", id, removed);
        Ok(removed)
    }

    /// Take `id` out of every cached list of the type, at any depth
    pub fn remove_everywhere(&self, type_tag: &str, id: &str) -> crate::Result<usize> {
        let root = list_root(type_tag);
        let Some(value) = self.store.get(&root)? else {
            return Ok(0);
        };
        let mut node = ListNode::from_value(&value);
        let removed = node.remove_id(id);
        if removed > 0 {
            self.store.set(root, node.into_value())?;
        }
        log::debug!("lists: removed {} from {} reference(s)", id, removed);
        Ok(removed)
    }
}
