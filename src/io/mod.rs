//! Interfaces to the collaborators the core talks to
//!
//! The transport, the user-messaging channel and the session are external.
//! The core sees them only through the traits in this module and the
//! JSend-style `Envelope` the server wraps every response in.

pub mod http;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use http::{ClientConfig, HttpTransport};

/// A boxed future, keeping the collaborator traits object safe
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Server response wrapper
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cargo: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Envelope {
    pub fn ok(cargo: Value) -> Self {
        Envelope { success: true, cargo: Some(cargo), ..Default::default() }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Envelope { success: false, message: Some(message.into()), ..Default::default() }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// True for a 401-class failure
    pub fn is_unauthorized(&self) -> bool {
        !self.success && matches!(self.code.as_deref(), Some("401") | Some("unauthorized"))
    }

    /// The payload, or the failure the server reported
    pub fn into_cargo(self) -> Result<Value, ServerFailure> {
        if self.success {
            return Ok(self.cargo.unwrap_or(Value::Null));
        }
        let unauthorized = self.is_unauthorized();
        Err(ServerFailure {
            message: self.message.unwrap_or_else(|| "Request failed".to_string()),
            code: self.code,
            unauthorized,
        })
    }
}

/// A failure reported inside an envelope
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ServerFailure {
    pub message: String,
    pub code: Option<String>,
    pub unauthorized: bool,
}

/// Failures below the envelope: the request never produced one
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Not authorised")]
    Unauthorized,

    #[error("HTTP {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Could not decode response: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TransportError::Unauthorized | TransportError::Status { code: 401, .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
}

/// Request parameters handed to the transport
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadParams {
    pub method: Method,
    pub data: Map<String, Value>,
}

impl LoadParams {
    pub fn get() -> Self {
        LoadParams { method: Method::Get, data: Map::new() }
    }

    pub fn post() -> Self {
        LoadParams { method: Method::Post, data: Map::new() }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Add the value only when present
    pub fn with_opt(self, key: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(value) => self.with(key, value),
            None => self,
        }
    }
}

/// A file to upload
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub name: String,
    pub mime: Option<String>,
    pub bytes: Vec<u8>,
}

/// Upload progress callback: (bytes sent, bytes total)
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// The HTTP call wrapper
pub trait Transport: Send + Sync {
    /// Call `url` (relative to the server) and decode the envelope
    fn load<'a>(&'a self, url: &'a str, params: LoadParams) -> BoxFuture<'a, Result<Envelope, TransportError>>;

    /// Upload a file, reporting progress as it goes
    fn upload<'a>(&'a self, file: UploadFile, on_progress: ProgressFn) -> BoxFuture<'a, Result<Envelope, TransportError>>;
}

/// Side channel for surfacing failures to the user. Fire and forget.
pub trait Messenger: Send + Sync {
    fn notify_user(&self, message: &str);
}

/// Identity of the current user and session re-verification
pub trait Session: Send + Sync {
    fn current_user_id(&self) -> Option<String>;

    fn verify_session(&self) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// Writes notices to the log
#[derive(Debug, Default, Clone)]
pub struct LogMessenger;

impl Messenger for LogMessenger {
    fn notify_user(&self, message: &str) {
        log::warn!("notice: {}", message);
    }
}

/// A fixed identity with no way to re-verify it
#[derive(Debug, Default, Clone)]
pub struct StaticSession {
    user_id: Option<String>,
}

impl StaticSession {
    pub fn new(user_id: Option<String>) -> Self {
        StaticSession { user_id }
    }
}

impl Session for StaticSession {
    fn current_user_id(&self) -> Option<String> {
        self.user_id.clone()
    }

    fn verify_session(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async { Err(TransportError::Unauthorized) })
    }
}

/// Strip the `<details>` debug blocks our servers append to error messages
pub fn sanitize_message(message: &str) -> String {
    match DETAILS.as_ref() {
        Some(details) => details.replace_all(message, "").trim().to_string(),
        None => message.trim().to_string(),
    }
}

/// One `<details>` block and the whitespace before it; lazy so that text
/// between two blocks survives
static DETAILS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\s*<details>[\s\S]*?</details>").ok());
