//! Cached list results
//!
//! A list slot holds `{hits, total}`. Lists of one type can nest under extra
//! keys (status, domain, query, sort), so the cached lists of a type form a
//! tree. `ListNode` makes that tree explicit: leaves are lists, branches are
//! keyed children, and anything else is carried through untouched.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::entity::{HasId, Kind};

/// One page of list results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct List {
    pub hits: Vec<Value>,
    #[serde(default)]
    pub total: u64,
    /// Other server-supplied fields (cursors and the like)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl List {
    pub fn new(hits: Vec<Value>) -> Self {
        let total = hits.len() as u64;
        List { hits, total, extra: Map::new() }
    }

    /// Read a list out of a stored value, if it is one
    pub fn from_value(value: &Value) -> Option<List> {
        match Kind::of(value) {
            Kind::List { .. } => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.hits.iter().any(|hit| hit.id() == Some(id))
    }

    /// Drop every hit with this id; returns how many went
    pub fn remove_id(&mut self, id: &str) -> usize {
        let before = self.hits.len();
        self.hits.retain(|hit| hit.id() != Some(id));
        let removed = before - self.hits.len();
        self.total = self.total.saturating_sub(removed as u64);
        removed
    }

    /// Put `item` first, replacing any previous reference with the same id
    pub fn insert_front(&mut self, item: Value) {
        let replaced = match item.id() {
            Some(id) => self.remove_id(id),
            None => 0,
        };
        self.hits.insert(0, item);
        self.total += 1;
        if replaced > 0 {
            log::debug!("list: replaced {} stale reference(s)", replaced);
        }
    }
}

/// A tree of cached lists
#[derive(Debug, Clone, PartialEq)]
pub enum ListNode {
    /// A list, plus any lists found among its extra fields
    Leaf { list: List, nested: BTreeMap<String, ListNode> },
    Branch(BTreeMap<String, ListNode>),
    /// A value that is neither a list nor a mapping of lists
    Other(Value),
}

impl ListNode {
    pub fn from_value(value: &Value) -> ListNode {
        match Kind::of(value) {
            Kind::List { .. } => match List::from_value(value) {
                Some(mut list) => {
                    let mut nested = BTreeMap::new();
                    let extra = std::mem::take(&mut list.extra);
                    for (key, child) in extra {
                        let node = ListNode::from_value(&child);
                        if node.leaf_count() > 0 {
                            nested.insert(key, node);
                        } else {
                            list.extra.insert(key, child);
                        }
                    }
                    ListNode::Leaf { list, nested }
                }
                None => ListNode::Other(value.clone()),
            },
            Kind::Object(map) => ListNode::Branch(
                map.iter().map(|(key, child)| (key.clone(), ListNode::from_value(child))).collect(),
            ),
            Kind::Entity { .. } | Kind::Array(_) | Kind::Scalar => ListNode::Other(value.clone()),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            ListNode::Leaf { mut list, nested } => {
                for (key, child) in nested {
                    list.extra.insert(key, child.into_value());
                }
                list.to_value()
            }
            ListNode::Branch(children) => Value::Object(
                children.into_iter().map(|(key, child)| (key, child.into_value())).collect(),
            ),
            ListNode::Other(value) => value,
        }
    }

    /// Remove `id` from every leaf below this node; returns how many hits went
    pub fn remove_id(&mut self, id: &str) -> usize {
        match self {
            ListNode::Leaf { list, nested } => {
                list.remove_id(id) + nested.values_mut().map(|child| child.remove_id(id)).sum::<usize>()
            }
            ListNode::Branch(children) => children.values_mut().map(|child| child.remove_id(id)).sum(),
            ListNode::Other(_) => 0,
        }
    }

    /// Number of lists below this node
    pub fn leaf_count(&self) -> usize {
        match self {
            ListNode::Leaf { nested, .. } => 1 + nested.values().map(ListNode::leaf_count).sum::<usize>(),
            ListNode::Branch(children) => children.values().map(ListNode::leaf_count).sum(),
            ListNode::Other(_) => 0,
        }
    }

    /// True if any leaf below this node references `id`
    pub fn contains(&self, id: &str) -> bool {
        match self {
            ListNode::Leaf { list, nested } => list.contains(id) || nested.values().any(|child| child.contains(id)),
            ListNode::Branch(children) => children.values().any(|child| child.contains(id)),
            ListNode::Other(_) => false,
        }
    }
}
