//! Error types for the data store
//!
//! Store errors cover wrong-shaped paths and invalid writes. Crud errors are
//! precondition failures raised before any network work is attempted.

use thiserror::Error;
use super::path::{Path, PathError};

/// Errors that can occur during store operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Path error: {0}")]
    PathError(#[from] PathError),

    #[error("Cannot index into {found} at path: {path}")]
    NotAContainer { path: Path, found: &'static str },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Precondition failures of the orchestration layer.
///
/// Network and server failures never show up here; they are recorded as edit
/// status instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CrudError {
    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Missing id for {0}")]
    MissingId(String),

    #[error("No {status} item to {action} for {type_} {id}")]
    MissingItem { action: String, status: String, type_: String, id: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for orchestration operations
pub type CrudResult<T> = std::result::Result<T, CrudError>;
