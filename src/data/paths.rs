//! Derived path conventions
//!
//! These layouts are relied on by tooling built over the store and must not
//! drift: entities live at `data.{type}.{status}.{id}`, lists at
//! `list.{type}.{status}.{domain|all}.{q|all}.{sort|unsorted}`, and
//! per-entity edit state below `transient.{type}.{id}`.
//!
//! List slots all sit at the same depth, so no slot can ever be nested
//! inside another.

use crate::core::path::Path;
use super::status::{CrudAction, KStatus};

/// Domain and query slot used when a list has no filter
pub const UNFILTERED: &str = "all";

/// Sort slot used when a list has no explicit sort
pub const UNSORTED: &str = "unsorted";

/// Parameters discriminating one cached list from another
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ListQuery {
    pub q: Option<String>,
    pub sort: Option<String>,
    pub domain: Option<String>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn q(mut self, q: impl Into<String>) -> Self {
        self.q = Some(q.into());
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

/// `data.{type}.{status}.{id}`
pub fn entity_path(status: KStatus, type_tag: &str, id: &str) -> Path {
    Path::from(["data", type_tag, status.as_str(), id])
}

/// `list.{type}`: root of every cached list of a type
pub fn list_root(type_tag: &str) -> Path {
    Path::from(["list", type_tag])
}

/// `list.{type}.{status}`: root of every cached list of a type in one status
pub fn list_status_root(type_tag: &str, status: KStatus) -> Path {
    list_root(type_tag).child(status.as_str())
}

/// Deterministic cache slot for a list query
pub fn list_path(type_tag: &str, status: KStatus, query: &ListQuery) -> Path {
    fn slot<'a>(value: &'a Option<String>, default: &'a str) -> &'a str {
        value.as_deref().filter(|v| !v.is_empty()).unwrap_or(default)
    }

    list_status_root(type_tag, status)
        .child(slot(&query.domain, UNFILTERED))
        .child(slot(&query.q, UNFILTERED))
        .child(slot(&query.sort, UNSORTED))
}

/// `transient.{type}.{id}`
pub fn transient_path(type_tag: &str, id: &str) -> Path {
    Path::from(["transient", type_tag, id])
}

/// `transient.{type}.{id}.localStatus`
pub fn edit_status_path(type_tag: &str, id: &str) -> Path {
    transient_path(type_tag, id).child("localStatus")
}

/// `transient.{type}.{id}.{action}.error`
pub fn error_path(type_tag: &str, id: &str, action: CrudAction) -> Path {
    transient_path(type_tag, id).child(action.as_str()).child("error")
}

/// `focus.{type}`: the currently selected id of a type
pub fn focus_path(type_tag: &str) -> Path {
    Path::from(["focus", type_tag])
}
