//! Per-entity edit status
//!
//! Each (type, id) moves through `clean -> dirty -> saving -> clean|saveerror`.
//! The status lives in the store at `transient.{type}.{id}.localStatus` and an
//! action's failure message at `transient.{type}.{id}.{action}.error`, so the
//! UI can render both by path.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::paths::{edit_status_path, error_path, transient_path};
use crate::data::status::CrudAction;
use crate::DataStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditStatus {
    #[default]
    Clean,
    Dirty,
    Saving,
    SaveError,
}

/// What happened to an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditEvent {
    /// A local write to the draft
    Edited,
    /// A server action was dispatched by the user
    Dispatched,
    /// The round trip succeeded; `still_dirty` when edits made meanwhile
    /// were carried over and are not saved yet
    Succeeded { still_dirty: bool },
    Failed,
}

impl EditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditStatus::Clean => "clean",
            EditStatus::Dirty => "dirty",
            EditStatus::Saving => "saving",
            EditStatus::SaveError => "saveerror",
        }
    }

    /// The status after `event`
    pub fn next(self, event: EditEvent) -> EditStatus {
        match (self, event) {
            // an edit during a save is reconciled when the save lands
            (EditStatus::Saving, EditEvent::Edited) => EditStatus::Saving,
            (_, EditEvent::Edited) => EditStatus::Dirty,
            (_, EditEvent::Dispatched) => EditStatus::Saving,
            (_, EditEvent::Succeeded { still_dirty: true }) => EditStatus::Dirty,
            (_, EditEvent::Succeeded { still_dirty: false }) => EditStatus::Clean,
            (_, EditEvent::Failed) => EditStatus::SaveError,
        }
    }
}

impl fmt::Display for EditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads and writes edit status through the store
#[derive(Clone)]
pub struct EditStatusTracker {
    store: Arc<DataStore>,
}

impl EditStatusTracker {
    pub fn new(store: Arc<DataStore>) -> Self {
        EditStatusTracker { store }
    }

    /// Current status; entities never touched are clean
    pub fn status(&self, type_tag: &str, id: &str) -> EditStatus {
        self.store
            .get(&edit_status_path(type_tag, id))
            .ok()
            .flatten()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    fn transition(&self, type_tag: &str, id: &str, event: EditEvent) -> crate::Result<EditStatus> {
        let before = self.status(type_tag, id);
        let after = before.next(event);
        if before != after || !self.store.exists(&edit_status_path(type_tag, id))? {
            log::trace!("edit status: {}.{} {} -> {}", type_tag, id, before, after);
            self.store
                .set(edit_status_path(type_tag, id), Value::String(after.as_str().to_string()))?;
        }
        Ok(after)
    }

    pub fn mark_dirty(&self, type_tag: &str, id: &str) -> crate::Result<EditStatus> {
        self.transition(type_tag, id, EditEvent::Edited)
    }

    pub fn begin(&self, type_tag: &str, id: &str) -> crate::Result<EditStatus> {
        self.transition(type_tag, id, EditEvent::Dispatched)
    }

    /// Record a successful round trip, clearing any earlier action errors
    pub fn succeed(&self, type_tag: &str, id: &str, still_dirty: bool) -> crate::Result<EditStatus> {
        self.clear_errors(type_tag, id)?;
        self.transition(type_tag, id, EditEvent::Succeeded { still_dirty })
    }

    /// Force the status back to clean, e.g. after a save that had nothing to send
    pub fn mark_clean(&self, type_tag: &str, id: &str) -> crate::Result<EditStatus> {
        self.succeed(type_tag, id, false)
    }

    /// Record a failed round trip and keep its message for the UI
    pub fn fail(&self, type_tag: &str, id: &str, action: CrudAction, message: &str) -> crate::Result<EditStatus> {
        self.store
            .set(error_path(type_tag, id, action), Value::String(message.to_string()))?;
        self.transition(type_tag, id, EditEvent::Failed)
    }

    /// The failure message of the last `action`, if it failed
    pub fn error(&self, type_tag: &str, id: &str, action: CrudAction) -> Option<String> {
        self.store
            .get(&error_path(type_tag, id, action))
            .ok()
            .flatten()
            .and_then(|value| value.as_str().map(str::to_string))
    }

    pub fn clear_errors(&self, type_tag: &str, id: &str) -> crate::Result<()> {
        for action in CrudAction::ALL {
            let path = error_path(type_tag, id, action);
            if self.store.exists(&path)? {
                self.store.delete(&path)?;
            }
        }
        Ok(())
    }

    /// Carry the transient state of a placeholder id over to its minted id
    pub fn move_to(&self, type_tag: &str, from_id: &str, to_id: &str) -> crate::Result<()> {
        if let Some(state) = self.store.delete(&transient_path(type_tag, from_id))? {
            self.store.set(transient_path(type_tag, to_id), state)?;
        }
        Ok(())
    }
}
