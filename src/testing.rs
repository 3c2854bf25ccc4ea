//! Scripted collaborators for unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use serde_json::{json, Map, Value};
use tokio::sync::oneshot;

use crate::io::{
    BoxFuture, Envelope, LoadParams, Messenger, ProgressFn, Session, Transport, TransportError, UploadFile,
};

/// Arbitrary JSON without floats. Mapping keys come from a small alphabet
/// so that two generated values share structure often enough to be
/// interesting.
pub fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,6}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-c]{1,2}", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

/// An arbitrary JSON mapping, the shape of an entity
pub fn arb_object() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-c]{1,2}", arb_json(), 0..5)
        .prop_map(|map| Value::Object(map.into_iter().collect::<Map<_, _>>()))
}

/// One recorded transport call
#[derive(Debug, Clone)]
pub struct Call {
    pub url: String,
    pub params: LoadParams,
}

impl Call {
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.data.get(key)
    }

    pub fn action(&self) -> Option<&str> {
        self.param("action").and_then(Value::as_str)
    }
}

/// Holds one response in flight until released
pub struct Gate {
    entered: oneshot::Receiver<()>,
    release: oneshot::Sender<()>,
}

impl Gate {
    /// Wait until the held request reaches the transport, then hand back the
    /// release switch
    pub async fn entered(self) -> oneshot::Sender<()> {
        let _ = self.entered.await;
        self.release
    }
}

struct Held {
    entered: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// Transport that records calls and replays queued responses.
///
/// With nothing queued, a request carrying an `item` is answered with that
/// item, which is what the server does for a plain save.
#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<Call>>,
    responses: Mutex<VecDeque<Result<Envelope, TransportError>>>,
    held: Mutex<Option<Held>>,
    uploads: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, response: Result<Envelope, TransportError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn respond_ok(&self, cargo: Value) {
        self.respond(Ok(Envelope::ok(cargo)));
    }

    /// Hold the next request until the returned gate is released
    pub fn hold_next(&self) -> Gate {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.held.lock().unwrap() = Some(Held { entered: entered_tx, release: release_rx });
        Gate { entered: entered_rx, release: release_tx }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    fn next_response(&self, params: &LoadParams) -> Result<Envelope, TransportError> {
        if let Some(response) = self.responses.lock().unwrap().pop_front() {
            return response;
        }
        match params.data.get("item") {
            Some(item) => Ok(Envelope::ok(item.clone())),
            None => Ok(Envelope::fail("No response scripted")),
        }
    }
}

impl Transport for MockTransport {
    fn load<'a>(&'a self, url: &'a str, params: LoadParams) -> BoxFuture<'a, Result<Envelope, TransportError>> {
        self.calls.lock().unwrap().push(Call { url: url.to_string(), params: params.clone() });
        let held = self.held.lock().unwrap().take();
        let response = self.next_response(&params);
        Box::pin(async move {
            if let Some(held) = held {
                let _ = held.entered.send(());
                let _ = held.release.await;
            }
            response
        })
    }

    fn upload<'a>(&'a self, file: UploadFile, on_progress: ProgressFn) -> BoxFuture<'a, Result<Envelope, TransportError>> {
        let total = file.bytes.len() as u64;
        self.uploads.lock().unwrap().push(file.name.clone());
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Envelope::ok(json!({"url": format!("https://media.test/{}", file.name)}))));
        Box::pin(async move {
            on_progress(0, total);
            on_progress(total, total);
            response
        })
    }
}

/// Messenger that keeps every notice
#[derive(Default)]
pub struct RecordingMessenger {
    messages: Mutex<Vec<String>>,
}

impl RecordingMessenger {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl Messenger for RecordingMessenger {
    fn notify_user(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

/// Session with a scripted verification outcome
#[derive(Default)]
pub struct FakeSession {
    pub user_id: Option<String>,
    pub verifies: bool,
    verify_calls: AtomicUsize,
}

impl FakeSession {
    pub fn logged_in(user_id: &str, verifies: bool) -> Self {
        FakeSession { user_id: Some(user_id.to_string()), verifies, ..Default::default() }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

impl Session for FakeSession {
    fn current_user_id(&self) -> Option<String> {
        self.user_id.clone()
    }

    fn verify_session(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let verifies = self.verifies;
        Box::pin(async move {
            if verifies {
                Ok(())
            } else {
                Err(TransportError::Unauthorized)
            }
        })
    }
}
