//! Server actions on remote items
//!
//! `CrudOrchestrator` sequences save/publish/unpublish/discard/delete/archive/copy
//! against the backend. Each action:
//!
//! 1. validates its arguments and marks the entity as saving,
//! 2. snapshots the local item and patches cached lists optimistically,
//! 3. sends the item (or, for diff saves, only the changes),
//! 4. carries any edits the user made during the round trip over onto the
//!    server's copy and stores the result under the action's status.
//!
//! Server and network failures never come back as `Err`: they become
//! `saveerror` status, an error message in the store and a user notice.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use uuid::Uuid;

use crate::cache::{FetchCache, FetchHandle, ListCache};
use crate::config::CoreConfig;
use crate::core::errors::{CrudError, CrudResult};
use crate::core::path::Path;
use crate::data::entity::{ensure_type, name, set_id, HasId, NEW_ID};
use crate::data::list::List;
use crate::data::paths::{entity_path, focus_path, ListQuery};
use crate::data::registry::{TypeRegistry, TypeSpec};
use crate::data::status::{CrudAction, KStatus, ListEffect};
use crate::io::{
    sanitize_message, Envelope, LoadParams, Messenger, ProgressFn, Session, Transport, TransportError,
    UploadFile,
};
use crate::DataStore;

use super::diff::{apply, diff, Edit};
use super::schedule::Debouncer;
use super::status::{EditStatus, EditStatusTracker};

/// Characters left alone by `encodeURIComponent`
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

const DEFAULT_AUTOSAVE_DELAY: Duration = Duration::from_millis(1000);

/// `{endpoint}/{id}.json`
pub fn item_url(spec: &TypeSpec, id: &str) -> String {
    format!("{}/{}.json", spec.endpoint(), utf8_percent_encode(id, URI_COMPONENT))
}

/// `{endpoint}[/{dataspace}]/_list.json`
pub fn list_url(spec: &TypeSpec, dataspace: Option<&str>) -> String {
    match dataspace {
        Some(space) => format!("{}/{}/_list.json", spec.endpoint(), space),
        None => format!("{}/_list.json", spec.endpoint()),
    }
}

/// How an action ended
#[derive(Debug, Clone, PartialEq)]
pub enum CrudOutcome {
    /// The server accepted the action; holds the stored item
    Done(Value),
    /// Nothing to send, no round trip made
    Unchanged,
    /// The server or network refused; the message is also in the store
    Failed { message: String },
}

impl CrudOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, CrudOutcome::Done(_))
    }

    pub fn item(&self) -> Option<&Value> {
        match self {
            CrudOutcome::Done(item) => Some(item),
            _ => None,
        }
    }
}

type DebounceKey = (String, String, CrudAction);

#[derive(Clone)]
pub struct CrudOrchestrator {
    store: Arc<DataStore>,
    transport: Arc<dyn Transport>,
    messenger: Arc<dyn Messenger>,
    session: Arc<dyn Session>,
    registry: Arc<TypeRegistry>,
    fetches: FetchCache,
    lists: ListCache,
    status: EditStatusTracker,
    debouncer: Debouncer<DebounceKey>,
    dataspace: Option<String>,
    autosave: bool,
}

impl CrudOrchestrator {
    pub fn new(
        store: Arc<DataStore>,
        transport: Arc<dyn Transport>,
        messenger: Arc<dyn Messenger>,
        session: Arc<dyn Session>,
        registry: TypeRegistry,
    ) -> Self {
        let fetches = FetchCache::new(store.clone(), messenger.clone());
        CrudOrchestrator {
            lists: ListCache::new(store.clone(), fetches.clone()),
            status: EditStatusTracker::new(store.clone()),
            fetches,
            store,
            transport,
            messenger,
            session,
            registry: Arc::new(registry),
            debouncer: Debouncer::new(DEFAULT_AUTOSAVE_DELAY),
            dataspace: None,
            autosave: false,
        }
    }

    /// Build from configuration: type registry, dataspace and autosave
    pub fn from_config(
        config: &CoreConfig,
        store: Arc<DataStore>,
        transport: Arc<dyn Transport>,
        messenger: Arc<dyn Messenger>,
        session: Arc<dyn Session>,
    ) -> Self {
        let orchestrator = Self::new(store, transport, messenger, session, config.registry())
            .with_dataspace(config.dataspace.clone());
        if config.autosave {
            orchestrator.with_autosave(Duration::from_millis(config.autosave_delay_ms))
        } else {
            orchestrator.with_debounce_delay(Duration::from_millis(config.autosave_delay_ms))
        }
    }

    pub fn with_dataspace(mut self, dataspace: Option<String>) -> Self {
        self.dataspace = dataspace;
        self
    }

    /// Save drafts automatically once edits have been quiet for `delay`
    pub fn with_autosave(mut self, delay: Duration) -> Self {
        self.autosave = true;
        self.with_debounce_delay(delay)
    }

    fn with_debounce_delay(mut self, delay: Duration) -> Self {
        self.debouncer = Debouncer::new(delay);
        self
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.store
    }

    pub fn edit_status(&self) -> &EditStatusTracker {
        &self.status
    }

    pub fn lists(&self) -> &ListCache {
        &self.lists
    }

    pub fn fetches(&self) -> &FetchCache {
        &self.fetches
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn status_of(&self, type_tag: &str, id: &str) -> EditStatus {
        self.status.status(type_tag, id)
    }

    fn storage_status(status: KStatus) -> CrudResult<KStatus> {
        if status.is_composite() {
            return Err(CrudError::UnknownStatus(format!("{} does not hold items", status)));
        }
        Ok(status)
    }

    fn check_id(type_tag: &str, id: &str) -> CrudResult<()> {
        if id.is_empty() {
            return Err(CrudError::MissingId(type_tag.to_string()));
        }
        Ok(())
    }

    // Reads

    /// The item at `status`, loading it through the fetch cache if it is not
    /// stored yet. With `swallow`, a failed load is not reported to the user.
    pub fn get_data_item(&self, type_tag: &str, id: &str, status: KStatus, swallow: bool) -> CrudResult<FetchHandle> {
        let spec = self.registry.check(type_tag)?;
        Self::check_id(type_tag, id)?;
        let status = Self::storage_status(status)?;

        let url = item_url(spec, id);
        let transport = self.transport.clone();
        let params = LoadParams::get().with("status", status.as_str());
        let this = self.clone();
        Ok(self.fetches.fetch(
            entity_path(status, type_tag, id),
            move || this.watch_session(async move { transport.load(&url, params).await }),
            !swallow,
        ))
    }

    /// Reload an item without blanking the local copy first. The copy is
    /// replaced only if the reload succeeds. Returns whether it did.
    pub async fn refresh_data_item(&self, type_tag: &str, id: &str, status: KStatus) -> CrudResult<bool> {
        let spec = self.registry.check(type_tag)?;
        Self::check_id(type_tag, id)?;
        let status = Self::storage_status(status)?;

        let url = item_url(spec, id);
        let params = LoadParams::get().with("status", status.as_str());
        let outcome = self.transport.load(&url, params).await;
        match outcome.map(Envelope::into_cargo) {
            Ok(Ok(mut item)) if item.is_object() => {
                ensure_type(&mut item, type_tag);
                if item.id().is_none() {
                    set_id(&mut item, id);
                }
                self.store.set(entity_path(status, type_tag, id), item)?;
                log::debug!("refreshed {} {} {}", status, type_tag, id);
                Ok(true)
            }
            Ok(Ok(other)) => {
                log::warn!("refresh of {} {} returned a {}", type_tag, id, crate::core::value::type_name(&other));
                Ok(false)
            }
            Ok(Err(failure)) => {
                log::warn!("refresh of {} {} failed: {}", type_tag, id, failure);
                Ok(false)
            }
            Err(e) => {
                log::warn!("refresh of {} {} failed: {}", type_tag, id, e);
                Ok(false)
            }
        }
    }

    /// Load a list of items into its cache slot
    pub fn list(&self, type_tag: &str, status: KStatus, query: &ListQuery) -> CrudResult<FetchHandle> {
        let spec = self.registry.check(type_tag)?;
        let url = list_url(spec, self.dataspace.as_deref());
        let params = LoadParams::get()
            .with("status", status.as_str())
            .with_opt("q", query.q.clone())
            .with_opt("sort", query.sort.clone())
            .with_opt("domain", query.domain.clone());
        let transport = self.transport.clone();
        let this = self.clone();

        Ok(self.lists.load(
            type_tag,
            status,
            query,
            move || {
                this.watch_session(async move {
                    let envelope = transport.load(&url, params).await?;
                    if envelope.success && !envelope.cargo.as_ref().is_some_and(|c| List::from_value(c).is_some()) {
                        return Ok(Envelope::fail(format!("Not a list: {}", url)));
                    }
                    Ok(envelope)
                })
            },
            true,
        ))
    }

    // Local edits

    /// Write `value` at `relative` inside the draft of an item and mark it
    /// dirty. With autosave on, a save is scheduled.
    pub fn edit(&self, type_tag: &str, id: &str, relative: &Path, value: Value) -> CrudResult<()> {
        self.registry.check(type_tag)?;
        Self::check_id(type_tag, id)?;
        let path = entity_path(KStatus::Draft, type_tag, id).join(relative);
        self.store.set(path, value)?;
        self.status.mark_dirty(type_tag, id)?;
        if self.autosave {
            self.save_debounced(type_tag, id);
        }
        Ok(())
    }

    // Actions

    /// Save the draft. With `previous`, only the changes since that snapshot
    /// are sent, and nothing at all when there are none.
    pub async fn save(
        &self,
        type_tag: &str,
        id: &str,
        item: Option<Value>,
        previous: Option<&Value>,
    ) -> CrudResult<CrudOutcome> {
        let Some(previous) = previous else {
            return self.crud(type_tag, id, CrudAction::Save, item, None).await;
        };

        self.registry.check(type_tag)?;
        Self::check_id(type_tag, id)?;
        let current = match item {
            Some(item) => item,
            None => self
                .store
                .get_data(KStatus::Draft, type_tag, id)?
                .ok_or_else(|| missing(CrudAction::Save, KStatus::Draft, type_tag, id))?,
        };
        let edits = diff(previous, &current);
        if edits.is_empty() {
            log::debug!("save {} {}: no changes", type_tag, id);
            self.status.mark_clean(type_tag, id)?;
            return Ok(CrudOutcome::Unchanged);
        }
        self.crud(type_tag, id, CrudAction::Save, Some(current), Some(edits)).await
    }

    /// Publish the draft. The published copy is stored as both PUBLISHED
    /// and DRAFT.
    pub async fn publish(&self, type_tag: &str, id: &str, item: Option<Value>) -> CrudResult<CrudOutcome> {
        self.crud(type_tag, id, CrudAction::Publish, item, None).await
    }

    pub async fn unpublish(&self, type_tag: &str, id: &str) -> CrudResult<CrudOutcome> {
        self.crud(type_tag, id, CrudAction::Unpublish, None, None).await
    }

    /// Throw away the draft's edits; the server sends back the published state
    pub async fn discard_edits(&self, type_tag: &str, id: &str) -> CrudResult<CrudOutcome> {
        self.crud(type_tag, id, CrudAction::DiscardEdits, None, None).await
    }

    pub async fn delete(&self, type_tag: &str, id: &str) -> CrudResult<CrudOutcome> {
        self.crud(type_tag, id, CrudAction::Delete, None, None).await
    }

    pub async fn archive(&self, type_tag: &str, id: &str, item: Option<Value>) -> CrudResult<CrudOutcome> {
        self.crud(type_tag, id, CrudAction::Archive, item, None).await
    }

    /// Save a copy of an item under a fresh id. The copy is a draft whose
    /// `parent` is the original and whose name gets a short random suffix.
    pub async fn copy(&self, type_tag: &str, id: &str, item: Option<Value>) -> CrudResult<CrudOutcome> {
        self.registry.check(type_tag)?;
        Self::check_id(type_tag, id)?;
        let source = match item {
            Some(item) => Some(item),
            None => match self.store.get_data(KStatus::Draft, type_tag, id)? {
                Some(draft) => Some(draft),
                None => self.store.get_data(KStatus::Published, type_tag, id)?,
            },
        };
        let mut copy = source.ok_or_else(|| missing(CrudAction::Copy, KStatus::Draft, type_tag, id))?;
        if !copy.is_object() {
            return Err(missing(CrudAction::Copy, KStatus::Draft, type_tag, id));
        }

        let new_id = Uuid::new_v4().simple().to_string();
        let suffix: String = Uuid::new_v4().simple().to_string().chars().take(4).collect();
        let title = match name(&copy) {
            Some(original) => format!("{} {}", original, suffix),
            None => format!("Copy {}", suffix),
        };
        set_id(&mut copy, &new_id);
        ensure_type(&mut copy, type_tag);
        if let Value::Object(map) = &mut copy {
            map.remove("@id");
            map.remove("xid");
            map.insert("parent".to_string(), Value::String(id.to_string()));
            map.insert("status".to_string(), Value::String(KStatus::Draft.as_str().to_string()));
            map.insert("name".to_string(), Value::String(title));
        }

        log::info!("copying {} {} as {}", type_tag, id, new_id);
        self.store.set(entity_path(KStatus::Draft, type_tag, &new_id), copy.clone())?;
        self.crud(type_tag, &new_id, CrudAction::Copy, Some(copy), None).await
    }

    /// Upload a file and store its URL at `target`
    pub async fn upload(&self, file: UploadFile, target: Path, on_progress: Option<ProgressFn>) -> CrudResult<CrudOutcome> {
        let progress: ProgressFn = match on_progress {
            Some(progress) => progress,
            None => Arc::new(|_: u64, _: u64| {}),
        };
        let file_name = file.name.clone();
        let result = self.transport.upload(file, progress).await;
        match unwrap_envelope(result) {
            Ok(cargo) => {
                let url = match &cargo {
                    Value::String(url) => Some(url.clone()),
                    other => other.get("url").and_then(Value::as_str).map(str::to_string),
                };
                match url {
                    Some(url) => {
                        self.store.set(target, Value::String(url))?;
                        log::info!("uploaded {}", file_name);
                        Ok(CrudOutcome::Done(cargo))
                    }
                    None => {
                        let message = format!("Upload of {} returned no url", file_name);
                        self.messenger.notify_user(&message);
                        Ok(CrudOutcome::Failed { message })
                    }
                }
            }
            Err(failure) => {
                let message = sanitize_message(&failure.message);
                log::warn!("upload of {} failed: {}", file_name, message);
                self.messenger.notify_user(&format!("Upload failed: {}", message));
                if failure.unauthorized {
                    self.check_session().await;
                }
                Ok(CrudOutcome::Failed { message })
            }
        }
    }

    // Debounced actions

    /// Save once the item has been quiet for the debounce delay
    pub fn save_debounced(&self, type_tag: &str, id: &str) {
        self.schedule(type_tag, id, CrudAction::Save);
    }

    /// Publish once the item has been quiet for the debounce delay
    pub fn publish_debounced(&self, type_tag: &str, id: &str) {
        self.schedule(type_tag, id, CrudAction::Publish);
    }

    /// Drop any debounced action queued for an item
    pub fn cancel_pending(&self, type_tag: &str, id: &str) -> usize {
        self.debouncer
            .cancel_where(|(t, i, _)| t.as_str() == type_tag && i.as_str() == id)
    }

    fn schedule(&self, type_tag: &str, id: &str, action: CrudAction) {
        let this = self.clone();
        let (type_tag, id) = (type_tag.to_string(), id.to_string());
        let key = (type_tag.clone(), id.clone(), action);
        self.debouncer.schedule(key, move || async move {
            let result = match action {
                CrudAction::Publish => this.publish(&type_tag, &id, None).await,
                _ => this.save(&type_tag, &id, None, None).await,
            };
            if let Err(e) = result {
                log::warn!("debounced {} of {} {} not sent: {}", action, type_tag, id, e);
            }
        });
    }

    // The shared round trip

    async fn crud(
        &self,
        type_tag: &str,
        id: &str,
        action: CrudAction,
        item: Option<Value>,
        edits: Option<Vec<Edit>>,
    ) -> CrudResult<CrudOutcome> {
        let spec = self.registry.check(type_tag)?;
        Self::check_id(type_tag, id)?;

        let start = action.start_status();
        let stored = self.store.get_data(start, type_tag, id)?;
        let mut item = match (item, &stored) {
            (Some(item), _) => item,
            (None, Some(stored)) => stored.clone(),
            // deleting needs nothing but the id
            (None, None) if action == CrudAction::Delete => serde_json::json!({"id": id}),
            (None, None) => return Err(missing(action, start, type_tag, id)),
        };
        if item.id().is_none() {
            set_id(&mut item, id);
        }
        ensure_type(&mut item, type_tag);

        let action = if id == NEW_ID && action == CrudAction::Save {
            CrudAction::New
        } else {
            action
        };

        self.status.begin(type_tag, id)?;
        let item_before = stored.unwrap_or_else(|| item.clone());

        let effect = action.list_effect();
        if !matches!(effect, ListEffect::Invalidate) {
            if let Err(e) = self.lists.apply(effect, type_tag, &item) {
                log::warn!("{} {} {}: cannot patch lists: {}", action, type_tag, id, e);
            }
        }

        let mut params = LoadParams::post()
            .with("action", action.wire_tag())
            .with("status", action.server_status().as_str())
            .with("type", type_tag);
        if action == CrudAction::New {
            params = params.with_opt("name", name(&item).map(str::to_string));
        }
        params = match edits {
            Some(edits) => params.with("diff", serde_json::to_value(&edits).unwrap_or(Value::Null)),
            None => params.with("item", item),
        };

        log::debug!("{} {} {}", action, type_tag, id);
        let url = item_url(spec, id);
        let result = self.transport.load(&url, params).await;

        // from here on nothing may escape as Err, or the status stays saving
        let failure = match unwrap_envelope(result) {
            Ok(cargo) => match self.on_success(type_tag, id, action, &item_before, cargo) {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    log::error!("{} {} {}: cannot store the server's copy: {}", action, type_tag, id, e);
                    Failure { message: e.to_string(), unauthorized: false }
                }
            },
            Err(failure) => failure,
        };
        Ok(self.on_failure(type_tag, id, action, failure).await)
    }

    fn on_success(
        &self,
        type_tag: &str,
        id: &str,
        action: CrudAction,
        item_before: &Value,
        cargo: Value,
    ) -> CrudResult<CrudOutcome> {
        if action == CrudAction::Delete {
            self.store.delete(&entity_path(KStatus::Published, type_tag, id))?;
            self.store.delete(&entity_path(KStatus::Draft, type_tag, id))?;
            let focus = focus_path(type_tag);
            if self.store.get(&focus)?.as_ref().and_then(Value::as_str) == Some(id) {
                self.store.delete(&focus)?;
            }
            self.status.succeed(type_tag, id, false)?;
            log::info!("deleted {} {}", type_tag, id);
            return Ok(CrudOutcome::Done(cargo));
        }

        let mut server_item = match cargo {
            Value::Object(_) => cargo,
            // some actions answer with nothing useful; keep what we sent
            _ => item_before.clone(),
        };
        ensure_type(&mut server_item, type_tag);
        let server_id = server_item.id().unwrap_or(id).to_string();

        // edits made while the request was out go back on top of the server's copy
        let live = self.store.get_data(action.start_status(), type_tag, id)?;
        let mut draft = server_item.clone();
        let mut still_dirty = false;
        if let Some(live) = live {
            for edit in diff(item_before, &live) {
                match apply(&mut draft, std::slice::from_ref(&edit)) {
                    Ok(()) => still_dirty = true,
                    // the server changed the shape under the edit
                    Err(e) => log::warn!("{} {}: dropping edit at {}: {}", type_tag, id, edit.path, e),
                }
            }
            if still_dirty {
                log::info!("{} {}: keeping edits made during {}", type_tag, id, action);
            }
        }

        match action {
            CrudAction::Publish => {
                self.store.set(entity_path(KStatus::Published, type_tag, &server_id), server_item.clone())?;
            }
            CrudAction::Archive => {
                self.store.set(entity_path(KStatus::Archived, type_tag, &server_id), server_item.clone())?;
                self.store.delete(&entity_path(KStatus::Published, type_tag, &server_id))?;
            }
            CrudAction::Unpublish => {
                self.store.delete(&entity_path(KStatus::Published, type_tag, &server_id))?;
            }
            CrudAction::New
            | CrudAction::Save
            | CrudAction::DiscardEdits
            | CrudAction::Copy
            | CrudAction::Delete => {}
        }
        self.store.set(entity_path(KStatus::Draft, type_tag, &server_id), draft.clone())?;

        if server_id != id {
            log::info!("{} {} is now {}", type_tag, id, server_id);
            self.store.delete(&entity_path(KStatus::Draft, type_tag, id))?;
            self.status.move_to(type_tag, id, &server_id)?;
            self.store.set(focus_path(type_tag), Value::String(server_id.clone()))?;
        }

        match action.list_effect() {
            ListEffect::Invalidate => self.lists.invalidate(type_tag)?,
            ListEffect::Promote { .. } => self.lists.apply(action.list_effect(), type_tag, &server_item)?,
            ListEffect::Demote { .. } | ListEffect::RemoveEverywhere => {}
        }

        self.status.succeed(type_tag, &server_id, still_dirty)?;
        log::info!("{} {} {}: done", action, type_tag, server_id);
        Ok(CrudOutcome::Done(draft))
    }

    async fn on_failure(
        &self,
        type_tag: &str,
        id: &str,
        action: CrudAction,
        failure: Failure,
    ) -> CrudOutcome {
        let message = sanitize_message(&failure.message);
        log::warn!("{} {} {} failed: {}", action, type_tag, id, message);

        // optimistic list patches cannot be trusted any more
        if let Err(e) = self.lists.invalidate(type_tag) {
            log::error!("cannot invalidate {} lists: {}", type_tag, e);
        }
        if let Err(e) = self.status.fail(type_tag, id, action, &message) {
            log::error!("cannot record {} failure of {} {}: {}", action, type_tag, id, e);
        }
        self.messenger.notify_user(&format!("{} failed: {}", action, message));

        if failure.unauthorized {
            self.check_session().await;
        }
        CrudOutcome::Failed { message }
    }

    /// Run a read request, checking the session if it comes back 401
    fn watch_session<Fut>(&self, request: Fut) -> impl Future<Output = Result<Envelope, TransportError>> + Send + 'static
    where
        Fut: Future<Output = Result<Envelope, TransportError>> + Send + 'static,
    {
        let this = self.clone();
        async move {
            let outcome = request.await;
            let unauthorized = match &outcome {
                Ok(envelope) => envelope.is_unauthorized(),
                Err(e) => e.is_unauthorized(),
            };
            if unauthorized {
                this.check_session().await;
            }
            outcome
        }
    }

    /// React to a 401: re-verify a believed-good session, or tell the user
    /// they need to log in
    async fn check_session(&self) {
        match self.session.current_user_id() {
            Some(user) => {
                if let Err(e) = self.session.verify_session().await {
                    log::warn!("session of {} did not verify: {}", user, e);
                    self.messenger.notify_user("Please log in again");
                }
            }
            None => self.messenger.notify_user("You are not logged in"),
        }
    }
}

/// A failed round trip, whichever layer it failed in
struct Failure {
    message: String,
    unauthorized: bool,
}

fn unwrap_envelope(result: Result<Envelope, TransportError>) -> Result<Value, Failure> {
    match result {
        Ok(envelope) => envelope.into_cargo().map_err(|failure| Failure {
            message: failure.message,
            unauthorized: failure.unauthorized,
        }),
        Err(e) => Err(Failure { unauthorized: e.is_unauthorized(), message: e.to_string() }),
    }
}

fn missing(action: CrudAction, status: KStatus, type_tag: &str, id: &str) -> CrudError {
    CrudError::MissingItem {
        action: action.to_string(),
        status: status.to_string(),
        type_: type_tag.to_string(),
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::list::List;
    use crate::data::paths::list_path;
    use crate::data::registry::TypeSpec;
    use crate::testing::{FakeSession, MockTransport, RecordingMessenger};
    use serde_json::json;

    struct Rig {
        crud: CrudOrchestrator,
        store: Arc<DataStore>,
        transport: Arc<MockTransport>,
        messenger: Arc<RecordingMessenger>,
        session: Arc<FakeSession>,
    }

    fn rig_with(session: FakeSession) -> Rig {
        let store = Arc::new(DataStore::new_in_memory());
        let transport = MockTransport::new();
        let messenger = Arc::new(RecordingMessenger::default());
        let session = Arc::new(session);
        let registry = TypeRegistry::new([TypeSpec::new("Advert"), TypeSpec::new("NGO").with_endpoint("charity")]);
        let crud = CrudOrchestrator::new(
            store.clone(),
            transport.clone(),
            messenger.clone(),
            session.clone(),
            registry,
        );
        Rig { crud, store, transport, messenger, session }
    }

    fn rig() -> Rig {
        rig_with(FakeSession::logged_in("alice@example.com", true))
    }

    fn draft(rig: &Rig, item: Value) {
        rig.store.set_data(KStatus::Draft, item).unwrap();
    }

    #[test]
    fn test_urls() {
        let spec = TypeSpec::new("Advert");
        assert_eq!(item_url(&spec, "a b/c"), "advert/a%20b%2Fc.json");
        assert_eq!(item_url(&spec, "x-1_2.3"), "advert/x-1_2.3.json");
        assert_eq!(list_url(&spec, Some("good-loop")), "advert/good-loop/_list.json");
        assert_eq!(list_url(&spec, None), "advert/_list.json");
    }

    #[tokio::test]
    async fn test_preconditions_fail_fast() {
        let rig = rig();
        assert!(matches!(
            rig.crud.publish("Widget", "x1", None).await,
            Err(CrudError::UnknownType(_))
        ));
        assert!(matches!(
            rig.crud.save("Advert", "", None, None).await,
            Err(CrudError::MissingId(_))
        ));
        assert!(matches!(
            rig.crud.publish("Advert", "x1", None).await,
            Err(CrudError::MissingItem { .. })
        ));
        assert_eq!(rig.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unchanged_save_skips_server() {
        let rig = rig();
        let item = json!({"id": "x1", "@type": "Advert", "name": "A"});
        draft(&rig, item.clone());
        rig.crud.edit_status().mark_dirty("Advert", "x1").unwrap();

        let outcome = rig.crud.save("Advert", "x1", None, Some(&item)).await.unwrap();
        assert_eq!(outcome, CrudOutcome::Unchanged);
        assert_eq!(rig.transport.call_count(), 0);
        assert_eq!(rig.crud.status_of("Advert", "x1"), EditStatus::Clean);
    }

    #[tokio::test]
    async fn test_diff_save_sends_only_changes() {
        let rig = rig();
        let previous = json!({"id": "x1", "@type": "Advert", "name": "A", "body": "text"});
        draft(&rig, json!({"id": "x1", "@type": "Advert", "name": "B", "body": "text"}));
        rig.transport.respond_ok(json!({"id": "x1", "@type": "Advert", "name": "B", "body": "text"}));

        let outcome = rig.crud.save("Advert", "x1", None, Some(&previous)).await.unwrap();
        assert!(outcome.is_done());

        let calls = rig.transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].url, "advert/x1.json");
        assert_eq!(calls[0].action(), Some("save"));
        assert!(calls[0].param("item").is_none());
        assert_eq!(
            calls[0].param("diff"),
            Some(&json!([{"op": "replace", "path": ["name"], "value": "B"}]))
        );
    }

    #[tokio::test]
    async fn test_save_round_trip() {
        let rig = rig();
        draft(&rig, json!({"id": "x1", "@type": "Advert", "name": "A"}));
        rig.crud.edit_status().mark_dirty("Advert", "x1").unwrap();
        let slot = list_path("Advert", KStatus::Draft, &ListQuery::new());
        rig.store.set(slot.clone(), json!({"hits": [], "total": 0})).unwrap();

        let outcome = rig.crud.save("Advert", "x1", None, None).await.unwrap();
        assert!(outcome.is_done());
        let call = &rig.transport.calls()[0];
        assert_eq!(call.param("status"), Some(&json!("DRAFT")));
        assert_eq!(call.param("type"), Some(&json!("Advert")));
        assert_eq!(rig.crud.status_of("Advert", "x1"), EditStatus::Clean);
        assert!(!rig.store.exists(&slot).unwrap());
    }

    #[tokio::test]
    async fn test_mid_flight_edit_survives() {
        let rig = rig();
        draft(&rig, json!({"id": "x1", "@type": "Advert", "name": "A", "body": "old"}));
        rig.transport.respond_ok(json!({
            "id": "x1", "@type": "Advert", "name": "A", "body": "server", "modified": "t1"
        }));
        let gate = rig.transport.hold_next();

        let crud = rig.crud.clone();
        let task = tokio::spawn(async move { crud.save("Advert", "x1", None, None).await });

        let release = gate.entered().await;
        assert_eq!(rig.crud.status_of("Advert", "x1"), EditStatus::Saving);
        rig.crud.edit("Advert", "x1", &Path::from(["name"]), json!("B")).unwrap();
        assert_eq!(rig.crud.status_of("Advert", "x1"), EditStatus::Saving);
        release.send(()).unwrap();

        assert!(task.await.unwrap().unwrap().is_done());
        let stored = rig.store.get_data(KStatus::Draft, "Advert", "x1").unwrap().unwrap();
        assert_eq!(stored["name"], "B");
        assert_eq!(stored["body"], "server");
        assert_eq!(stored["modified"], "t1");
        assert_eq!(rig.crud.status_of("Advert", "x1"), EditStatus::Dirty);
    }

    #[tokio::test]
    async fn test_publish_stores_both_copies_and_patches_lists() {
        let rig = rig();
        draft(&rig, json!({"id": "x1", "@type": "Advert", "name": "A"}));
        let all = ListQuery::new();
        rig.store
            .set(
                list_path("Advert", KStatus::Published, &all),
                json!({"hits": [{"id": "a"}, {"id": "x1", "name": "old"}], "total": 2}),
            )
            .unwrap();
        rig.store
            .set(list_path("Advert", KStatus::AllBarTrash, &all), json!({"hits": [{"id": "b"}], "total": 1}))
            .unwrap();
        rig.transport
            .respond_ok(json!({"id": "x1", "@type": "Advert", "name": "A", "status": "PUBLISHED"}));

        let outcome = rig.crud.publish("Advert", "x1", None).await.unwrap();
        assert!(outcome.is_done());
        assert_eq!(rig.transport.calls()[0].action(), Some("publish"));
        assert_eq!(rig.transport.calls()[0].param("status"), Some(&json!("PUBLISHED")));

        let published = rig.store.get_data(KStatus::Published, "Advert", "x1").unwrap().unwrap();
        let draft = rig.store.get_data(KStatus::Draft, "Advert", "x1").unwrap().unwrap();
        assert_eq!(published, draft);
        assert_eq!(published["status"], "PUBLISHED");

        for status in [KStatus::Published, KStatus::AllBarTrash] {
            let list = rig.crud.lists().get("Advert", status, &all).unwrap().unwrap();
            let hits: Vec<_> = list.hits.iter().filter_map(|hit| hit.id()).collect();
            assert_eq!(hits.iter().filter(|id| **id == "x1").count(), 1);
            assert_eq!(hits[0], "x1");
        }
        assert_eq!(rig.crud.status_of("Advert", "x1"), EditStatus::Clean);
    }

    #[tokio::test]
    async fn test_failed_publish_records_error() {
        let rig = rig();
        draft(&rig, json!({"id": "x1", "@type": "Advert", "name": "A"}));
        let all = ListQuery::new();
        rig.store
            .set(list_path("Advert", KStatus::Published, &all), json!({"hits": [], "total": 0}))
            .unwrap();
        rig.transport
            .respond(Ok(Envelope::fail("Bad name <details>trace\nmore</details>")));

        let outcome = rig.crud.publish("Advert", "x1", None).await.unwrap();
        assert_eq!(outcome, CrudOutcome::Failed { message: "Bad name".to_string() });
        assert_eq!(rig.crud.status_of("Advert", "x1"), EditStatus::SaveError);
        assert_eq!(
            rig.crud.edit_status().error("Advert", "x1", CrudAction::Publish).as_deref(),
            Some("Bad name")
        );
        assert_eq!(rig.messenger.messages(), vec!["publish failed: Bad name".to_string()]);
        assert!(rig.crud.lists().get("Advert", KStatus::Published, &all).unwrap().is_none());
        assert_eq!(rig.session.verify_calls(), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_reverifies_session() {
        let rig = rig_with(FakeSession::logged_in("alice@example.com", false));
        draft(&rig, json!({"id": "x1", "@type": "Advert"}));
        rig.transport.respond(Ok(Envelope::fail("Session expired").with_code("401")));

        rig.crud.save("Advert", "x1", None, None).await.unwrap();
        assert_eq!(rig.session.verify_calls(), 1);
        assert_eq!(
            rig.messenger.messages(),
            vec!["save failed: Session expired".to_string(), "Please log in again".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unauthorized_without_user() {
        let rig = rig_with(FakeSession::anonymous());
        draft(&rig, json!({"id": "x1", "@type": "Advert"}));
        rig.transport.respond(Err(TransportError::Unauthorized));

        rig.crud.save("Advert", "x1", None, None).await.unwrap();
        assert_eq!(rig.session.verify_calls(), 0);
        assert_eq!(rig.messenger.messages().last().map(String::as_str), Some("You are not logged in"));
    }

    #[tokio::test]
    async fn test_new_item_gets_server_id() {
        let rig = rig();
        draft(&rig, json!({"id": "new", "@type": "Advert", "name": "Fresh"}));
        rig.transport.respond_ok(json!({"id": "x42", "@type": "Advert", "name": "Fresh"}));

        let outcome = rig.crud.save("Advert", NEW_ID, None, None).await.unwrap();
        assert_eq!(outcome.item().and_then(|item| item.id()), Some("x42"));

        let call = &rig.transport.calls()[0];
        assert_eq!(call.action(), Some("new"));
        assert_eq!(call.param("name"), Some(&json!("Fresh")));
        assert!(rig.store.get_data(KStatus::Draft, "Advert", "x42").unwrap().is_some());
        assert!(rig.store.get_data(KStatus::Draft, "Advert", NEW_ID).unwrap().is_none());
        assert_eq!(rig.store.get(&focus_path("Advert")).unwrap(), Some(json!("x42")));
        assert_eq!(rig.crud.status_of("Advert", "x42"), EditStatus::Clean);
    }

    #[tokio::test]
    async fn test_copy_mints_a_draft() {
        let rig = rig();
        draft(&rig, json!({"id": "x1", "@type": "Advert", "name": "Summer sale", "status": "PUBLISHED"}));

        let outcome = rig.crud.copy("Advert", "x1", None).await.unwrap();
        let copy = outcome.item().cloned().unwrap();
        let new_id = copy.id().unwrap().to_string();
        assert_ne!(new_id, "x1");
        assert_eq!(copy["parent"], "x1");
        assert_eq!(copy["status"], "DRAFT");
        let title = copy["name"].as_str().unwrap();
        assert!(title.starts_with("Summer sale "));
        assert_ne!(title, "Summer sale ");

        let call = &rig.transport.calls()[0];
        assert_eq!(call.action(), Some("save"));
        assert_eq!(call.url, format!("advert/{}.json", new_id));
        assert!(rig.store.get_data(KStatus::Draft, "Advert", &new_id).unwrap().is_some());
        assert_eq!(
            rig.store.get_data(KStatus::Draft, "Advert", "x1").unwrap().unwrap()["name"],
            "Summer sale"
        );
    }

    #[tokio::test]
    async fn test_delete_clears_local_copies_and_lists() {
        let rig = rig();
        draft(&rig, json!({"id": "x9", "@type": "Advert"}));
        rig.store.set_data(KStatus::Published, json!({"id": "x9", "@type": "Advert"})).unwrap();
        rig.store.set(focus_path("Advert"), json!("x9")).unwrap();
        rig.store
            .set(
                Path::from(["list", "Advert"]),
                json!({
                    "PUBLISHED": {"all": {"hits": [{"id": "x9"}], "total": 1}},
                    "ALL_BAR_TRASH": {"good-loop": {"all": {"hits": [{"id": "x9"}, {"id": "y"}], "total": 2}}}
                }),
            )
            .unwrap();
        rig.transport.respond_ok(json!({"id": "x9", "status": "TRASH"}));

        assert!(rig.crud.delete("Advert", "x9").await.unwrap().is_done());
        assert_eq!(rig.transport.calls()[0].param("status"), Some(&json!("TRASH")));
        assert!(rig.store.get_data(KStatus::Draft, "Advert", "x9").unwrap().is_none());
        assert!(rig.store.get_data(KStatus::Published, "Advert", "x9").unwrap().is_none());
        assert!(rig.store.get(&focus_path("Advert")).unwrap().is_none());
        let lists = rig.store.get(&Path::from(["list", "Advert"])).unwrap().unwrap();
        assert!(!crate::data::list::ListNode::from_value(&lists).contains("x9"));
    }

    #[tokio::test]
    async fn test_delete_without_local_copy() {
        let rig = rig();
        rig.transport.respond_ok(Value::Null);
        assert!(rig.crud.delete("Advert", "gone").await.unwrap().is_done());
        let sent = rig.transport.calls()[0].param("item").cloned().unwrap();
        assert_eq!(sent, json!({"id": "gone", "@type": "Advert"}));
    }

    #[tokio::test]
    async fn test_unpublish_and_archive_move_copies() {
        let rig = rig();
        rig.store.set_data(KStatus::Published, json!({"id": "x1", "@type": "Advert"})).unwrap();
        rig.transport.respond_ok(json!({"id": "x1", "@type": "Advert", "status": "DRAFT"}));
        assert!(rig.crud.unpublish("Advert", "x1").await.unwrap().is_done());
        assert!(rig.store.get_data(KStatus::Published, "Advert", "x1").unwrap().is_none());
        assert!(rig.store.get_data(KStatus::Draft, "Advert", "x1").unwrap().is_some());

        rig.transport.respond_ok(json!({"id": "x1", "@type": "Advert", "status": "ARCHIVED"}));
        assert!(rig.crud.archive("Advert", "x1", None).await.unwrap().is_done());
        assert_eq!(rig.transport.calls()[1].action(), Some("archive"));
        assert!(rig.store.get_data(KStatus::Archived, "Advert", "x1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_discard_edits_takes_server_copy() {
        let rig = rig();
        draft(&rig, json!({"id": "x1", "@type": "Advert", "name": "scribble"}));
        rig.transport.respond_ok(json!({"id": "x1", "@type": "Advert", "name": "clean"}));
        rig.crud.discard_edits("Advert", "x1").await.unwrap();
        assert_eq!(rig.transport.calls()[0].action(), Some("discard-edits"));
        assert_eq!(rig.store.get_data(KStatus::Draft, "Advert", "x1").unwrap().unwrap()["name"], "clean");
    }

    #[tokio::test]
    async fn test_get_data_item_is_cached() {
        let rig = rig();
        rig.transport.respond_ok(json!({"id": "c1", "@type": "NGO", "name": "Oxfam"}));

        let first = rig.crud.get_data_item("NGO", "c1", KStatus::Published, false).unwrap();
        let second = rig.crud.get_data_item("NGO", "c1", KStatus::Published, false).unwrap();
        assert!(first.same_as(&second));
        assert_eq!(first.wait().await.unwrap()["name"], "Oxfam");

        let third = rig.crud.get_data_item("NGO", "c1", KStatus::Published, false).unwrap();
        assert!(third.is_resolved());
        let calls = rig.transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].url, "charity/c1.json");
        assert_eq!(calls[0].param("status"), Some(&json!("PUBLISHED")));
        assert!(rig.crud.get_data_item("NGO", "c1", KStatus::AllBarTrash, false).is_err());
    }

    #[tokio::test]
    async fn test_swallowed_fetch_is_quiet() {
        let rig = rig();
        rig.transport.respond(Ok(Envelope::fail("Not found")));
        let handle = rig.crud.get_data_item("Advert", "nope", KStatus::Draft, true).unwrap();
        assert!(handle.wait().await.is_err());
        assert!(rig.messenger.messages().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_keeps_local_copy_on_failure() {
        let rig = rig();
        rig.store.set_data(KStatus::Published, json!({"id": "x1", "@type": "Advert", "v": 1})).unwrap();

        rig.transport.respond(Err(TransportError::Network("offline".to_string())));
        assert!(!rig.crud.refresh_data_item("Advert", "x1", KStatus::Published).await.unwrap());
        assert_eq!(rig.store.get_data(KStatus::Published, "Advert", "x1").unwrap().unwrap()["v"], 1);

        rig.transport.respond_ok(json!({"id": "x1", "v": 2}));
        assert!(rig.crud.refresh_data_item("Advert", "x1", KStatus::Published).await.unwrap());
        assert_eq!(rig.store.get_data(KStatus::Published, "Advert", "x1").unwrap().unwrap()["v"], 2);
    }

    #[tokio::test]
    async fn test_list_validates_shape() {
        let query = ListQuery::new().q("shoes");
        let transport = MockTransport::new();
        let crud = CrudOrchestrator::new(
            Arc::new(DataStore::new_in_memory()),
            transport.clone(),
            Arc::new(RecordingMessenger::default()),
            Arc::new(FakeSession::anonymous()),
            TypeRegistry::new([TypeSpec::new("Advert")]),
        )
        .with_dataspace(Some("good-loop".to_string()));

        transport.respond_ok(json!({"hits": [{"id": "x1"}], "total": 1}));
        let list = crud.list("Advert", KStatus::Published, &query).unwrap().wait().await.unwrap();
        assert_eq!(List::from_value(&list).unwrap().total, 1);
        assert_eq!(transport.calls()[0].url, "advert/good-loop/_list.json");
        assert_eq!(transport.calls()[0].param("q"), Some(&json!("shoes")));

        transport.respond_ok(json!({"id": "x1"}));
        let err = crud.list("Advert", KStatus::Draft, &query).unwrap().wait().await;
        assert!(err.is_err());
        assert!(!crud.store().exists(&list_path("Advert", KStatus::Draft, &query)).unwrap());
    }

    #[tokio::test]
    async fn test_upload_stores_url() {
        let rig = rig();
        let target = Path::from(["data", "Advert", "DRAFT", "x1", "image"]);
        let file = UploadFile { name: "logo.png".to_string(), mime: Some("image/png".to_string()), bytes: vec![1, 2, 3] };
        let outcome = rig.crud.upload(file, target.clone(), None).await.unwrap();
        assert!(outcome.is_done());
        assert_eq!(rig.store.get(&target).unwrap(), Some(json!("https://media.test/logo.png")));
        assert_eq!(rig.transport.uploads(), vec!["logo.png".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_autosave_debounces_edits() {
        let mut rig = rig();
        rig.crud = rig.crud.clone().with_autosave(Duration::from_millis(1000));
        draft(&rig, json!({"id": "x1", "@type": "Advert", "name": "A"}));

        for name in ["B", "Bo", "Bob"] {
            rig.crud.edit("Advert", "x1", &Path::from(["name"]), json!(name)).unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        assert_eq!(rig.transport.call_count(), 0);
        assert_eq!(rig.crud.status_of("Advert", "x1"), EditStatus::Dirty);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let calls = rig.transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].param("item").and_then(|item| item.get("name")), Some(&json!("Bob")));
        assert_eq!(rig.crud.status_of("Advert", "x1"), EditStatus::Clean);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_publish() {
        let rig = rig();
        draft(&rig, json!({"id": "x1", "@type": "Advert"}));
        rig.crud.publish_debounced("Advert", "x1");
        rig.crud.save_debounced("Advert", "x1");
        assert_eq!(rig.crud.cancel_pending("Advert", "x1"), 2);
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(rig.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_edit_that_no_longer_fits_is_dropped() {
        let rig = rig();
        draft(&rig, json!({"id": "x1", "@type": "Advert", "meta": {"a": 1}, "name": "A"}));
        rig.transport.respond_ok(json!({"id": "x1", "@type": "Advert", "meta": "normalised", "name": "A"}));
        let gate = rig.transport.hold_next();

        let crud = rig.crud.clone();
        let task = tokio::spawn(async move { crud.save("Advert", "x1", None, None).await });

        let release = gate.entered().await;
        rig.crud.edit("Advert", "x1", &Path::from(["meta", "a"]), json!(2)).unwrap();
        release.send(()).unwrap();

        assert!(task.await.unwrap().unwrap().is_done());
        let stored = rig.store.get_data(KStatus::Draft, "Advert", "x1").unwrap().unwrap();
        assert_eq!(stored["meta"], "normalised");
        assert_eq!(rig.crud.status_of("Advert", "x1"), EditStatus::Clean);
    }

    #[tokio::test]
    async fn test_unauthorized_read_reverifies_session() {
        let rig = rig_with(FakeSession::logged_in("alice@example.com", false));
        rig.transport.respond(Ok(Envelope::fail("Session expired").with_code("401")));

        let handle = rig.crud.get_data_item("Advert", "x1", KStatus::Published, false).unwrap();
        assert!(handle.wait().await.is_err());
        assert_eq!(rig.session.verify_calls(), 1);
        assert!(rig.messenger.messages().contains(&"Please log in again".to_string()));
    }

    #[tokio::test]
    async fn test_unauthorized_list_without_user() {
        let rig = rig_with(FakeSession::anonymous());
        rig.transport.respond(Err(TransportError::Unauthorized));

        let handle = rig.crud.list("Advert", KStatus::Published, &ListQuery::new()).unwrap();
        assert!(handle.wait().await.is_err());
        assert_eq!(rig.session.verify_calls(), 0);
        assert!(rig.messenger.messages().contains(&"You are not logged in".to_string()));
    }
}
