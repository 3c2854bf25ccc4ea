//! Lifecycle statuses and CRUD actions
//!
//! Both are closed sets. Parsing an unknown tag is a precondition failure.

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::core::errors::CrudError;

/// Lifecycle status of an editable entity, or a composite list view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KStatus {
    Draft,
    Published,
    Modified,
    Archived,
    Trash,
    /// Composite view: everything except trashed items
    AllBarTrash,
    /// Composite view: published or archived
    PubOrArc,
}

impl KStatus {
    pub const ALL: [KStatus; 7] = [
        KStatus::Draft,
        KStatus::Published,
        KStatus::Modified,
        KStatus::Archived,
        KStatus::Trash,
        KStatus::AllBarTrash,
        KStatus::PubOrArc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KStatus::Draft => "DRAFT",
            KStatus::Published => "PUBLISHED",
            KStatus::Modified => "MODIFIED",
            KStatus::Archived => "ARCHIVED",
            KStatus::Trash => "TRASH",
            KStatus::AllBarTrash => "ALL_BAR_TRASH",
            KStatus::PubOrArc => "PUB_OR_ARC",
        }
    }

    /// Composite views only ever name lists, never a stored entity slot
    pub fn is_composite(&self) -> bool {
        matches!(self, KStatus::AllBarTrash | KStatus::PubOrArc)
    }
}

impl fmt::Display for KStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KStatus {
    type Err = CrudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CrudError::UnknownStatus(s.to_string()))
    }
}

/// How an action patches cached lists of its type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEffect {
    /// Cannot be patched locally; drop the type's lists
    Invalidate,
    /// Put the fresh entity at the front of `into`, after taking it out of `remove_from`
    Promote {
        into: &'static [KStatus],
        remove_from: &'static [KStatus],
    },
    /// Take the entity out of every `from` list, invalidate the rest
    Demote { from: &'static [KStatus] },
    /// Take the entity out of every cached list of the type, at any depth
    RemoveEverywhere,
}

/// Server-side actions on a remote item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrudAction {
    New,
    Save,
    Publish,
    Unpublish,
    DiscardEdits,
    Delete,
    Archive,
    Copy,
}

impl CrudAction {
    pub const ALL: [CrudAction; 8] = [
        CrudAction::New,
        CrudAction::Save,
        CrudAction::Publish,
        CrudAction::Unpublish,
        CrudAction::DiscardEdits,
        CrudAction::Delete,
        CrudAction::Archive,
        CrudAction::Copy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CrudAction::New => "new",
            CrudAction::Save => "save",
            CrudAction::Publish => "publish",
            CrudAction::Unpublish => "unpublish",
            CrudAction::DiscardEdits => "discard-edits",
            CrudAction::Delete => "delete",
            CrudAction::Archive => "archive",
            CrudAction::Copy => "copy",
        }
    }

    /// The action tag sent to the server. A copy is saved under its fresh id.
    pub fn wire_tag(&self) -> &'static str {
        match self {
            CrudAction::Copy => CrudAction::Save.as_str(),
            other => other.as_str(),
        }
    }

    /// Which local slot holds the item this action starts from
    pub fn start_status(&self) -> KStatus {
        match self {
            CrudAction::Unpublish => KStatus::Published,
            _ => KStatus::Draft,
        }
    }

    /// The status the server files the item under afterwards
    pub fn server_status(&self) -> KStatus {
        match self {
            CrudAction::Publish => KStatus::Published,
            CrudAction::Delete => KStatus::Trash,
            CrudAction::Archive => KStatus::Archived,
            CrudAction::New
            | CrudAction::Save
            | CrudAction::Unpublish
            | CrudAction::DiscardEdits
            | CrudAction::Copy => KStatus::Draft,
        }
    }

    pub fn list_effect(&self) -> ListEffect {
        match self {
            CrudAction::Publish => ListEffect::Promote {
                into: &[KStatus::Published, KStatus::AllBarTrash],
                remove_from: &[],
            },
            CrudAction::Archive => ListEffect::Promote {
                into: &[KStatus::Archived, KStatus::AllBarTrash],
                remove_from: &[KStatus::Published],
            },
            CrudAction::Unpublish => ListEffect::Demote { from: &[KStatus::Published] },
            CrudAction::Delete => ListEffect::RemoveEverywhere,
            CrudAction::New | CrudAction::Save | CrudAction::DiscardEdits | CrudAction::Copy => {
                ListEffect::Invalidate
            }
        }
    }
}

impl fmt::Display for CrudAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrudAction {
    type Err = CrudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CrudAction::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| CrudError::UnknownAction(s.to_string()))
    }
}
